//! In-memory backend and channel fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use evalwatch::api::{ApiError, EvaluationApi, Result};
use evalwatch::transport::{ChannelConnector, ChannelStream, Frame};
use evalwatch::{
    Channel, Evaluation, EvaluationStatus, EvaluationSummary, QcmItem, SessionUpdate,
    StartEvaluationRequest, StartedEvaluation, TransportError,
};
use tokio::sync::{broadcast, mpsc, watch};

/// Backend fake: records are served from memory and can be changed
/// while a session runs.
#[derive(Default)]
pub struct FakeApi {
    records: Mutex<Vec<Evaluation>>,
    qcm: Mutex<HashMap<String, Vec<QcmItem>>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: AtomicBool,
    get_calls: AtomicUsize,
    started: Mutex<Vec<StartEvaluationRequest>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record with the same id, keeping list order.
    pub fn put(&self, evaluation: Evaluation) {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == evaluation.id) {
            Some(record) => *record = evaluation,
            None => records.push(evaluation),
        }
    }

    pub fn put_qcm(&self, evaluation_id: &str, items: Vec<QcmItem>) {
        self.qcm
            .lock()
            .unwrap()
            .insert(evaluation_id.to_string(), items);
    }

    /// Delays every fetch of `evaluation_id`.
    pub fn delay(&self, evaluation_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(evaluation_id.to_string(), delay);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<StartEvaluationRequest> {
        self.started.lock().unwrap().clone()
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                url: format!("http://fake{}", path),
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(())
    }

    async fn wait(&self, evaluation_id: &str) {
        let delay = self.delays.lock().unwrap().get(evaluation_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl EvaluationApi for FakeApi {
    async fn list_evaluations(&self) -> Result<Vec<EvaluationSummary>> {
        self.check("/api/evaluations")?;
        let records = self.records.lock().unwrap();
        Ok(records.iter().map(summary_of).collect())
    }

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.wait(id).await;
        self.check(&format!("/api/evaluations/{}", id))?;
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                url: format!("http://fake/api/evaluations/{}", id),
                status: 404,
                body: "Evaluation not found".to_string(),
            })
    }

    async fn get_evaluation_qcm(&self, id: &str) -> Result<Vec<QcmItem>> {
        self.check(&format!("/api/evaluations/{}/qcm", id))?;
        Ok(self.qcm.lock().unwrap().get(id).cloned().unwrap_or_default())
    }

    async fn start_evaluation(&self, request: &StartEvaluationRequest) -> Result<StartedEvaluation> {
        self.check("/api/evaluations/start")?;
        let mut started = self.started.lock().unwrap();
        started.push(request.clone());
        let evaluation_id = format!("started-{}", started.len());
        drop(started);

        let mut record = Evaluation::pending(&evaluation_id);
        record.documents = request.document_ids.clone();
        record.test_mode = request.test_mode;
        self.put(record);

        Ok(StartedEvaluation {
            evaluation_id,
            selected_criteria: request.selected_criteria.clone(),
            advanced_criteria: request.advanced_criteria.clone(),
        })
    }
}

fn summary_of(record: &Evaluation) -> EvaluationSummary {
    EvaluationSummary {
        id: record.id.clone(),
        status: record.status,
        progress: record.progress,
        total_qcm: record.total_qcm,
        completed_qcm: record.completed_qcm,
        qcm_count: None,
        documents: record.documents.clone(),
        test_mode: record.test_mode,
        start_time: record.start_time.clone(),
        end_time: record.end_time.clone(),
        error: record.error.clone(),
    }
}

struct FakeStream(mpsc::UnboundedReceiver<Frame>);

#[async_trait]
impl ChannelStream for FakeStream {
    async fn next_frame(&mut self) -> Option<std::result::Result<Frame, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Channel fake: every accepted connection can be fed frames or closed
/// from the test.
pub struct FakeConnector {
    servers: Mutex<HashMap<String, mpsc::UnboundedSender<Frame>>>,
    accepted: watch::Sender<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (accepted, _) = watch::channel(Vec::new());
        Self {
            servers: Mutex::new(HashMap::new()),
            accepted,
        }
    }

    /// Number of connections accepted so far for `channel`.
    pub fn connections(&self, channel: Channel) -> usize {
        self.accepted
            .borrow()
            .iter()
            .filter(|url| url.ends_with(channel.name()))
            .count()
    }

    pub async fn wait_connections(&self, channel: Channel, count: usize) {
        let mut rx = self.accepted.subscribe();
        rx.wait_for(|urls| urls.iter().filter(|u| u.ends_with(channel.name())).count() >= count)
            .await
            .unwrap();
    }

    /// Sends a text frame on the latest connection of `channel`.
    pub fn push(&self, channel: Channel, payload: &str) {
        let servers = self.servers.lock().unwrap();
        let server = servers
            .iter()
            .find(|(url, _)| url.ends_with(channel.name()))
            .map(|(_, tx)| tx)
            .expect("channel not connected");
        server.send(Frame::Text(payload.to_string())).unwrap();
    }

    /// Ends the latest connection of `channel` from the server side.
    pub fn close(&self, channel: Channel) {
        let mut servers = self.servers.lock().unwrap();
        let url = servers
            .keys()
            .find(|url| url.ends_with(channel.name()))
            .cloned();
        if let Some(tx) = url.and_then(|url| servers.remove(&url)) {
            let _ = tx.send(Frame::Close);
        }
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> std::result::Result<Box<dyn ChannelStream>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.servers.lock().unwrap().insert(url.to_string(), tx);
        self.accepted.send_modify(|urls| urls.push(url.to_string()));
        Ok(Box::new(FakeStream(rx)))
    }
}

pub fn running(id: &str, progress: f64) -> Evaluation {
    Evaluation {
        status: EvaluationStatus::Running,
        progress,
        ..Evaluation::pending(id)
    }
}

pub fn qcm(id: &str) -> QcmItem {
    QcmItem {
        id: id.to_string(),
        criterion: "Legal_Compliance".to_string(),
        difficulty: "subtle".to_string(),
        category: Some("reasoning".to_string()),
        question: format!("Question {}?", id),
        choices: BTreeMap::from([
            ("A".to_string(), "first".to_string()),
            ("B".to_string(), "second".to_string()),
            ("C".to_string(), "third".to_string()),
            ("D".to_string(), "fourth".to_string()),
        ]),
        correct_answer: "C".to_string(),
        explanation: None,
        points: Some(1.0),
    }
}

pub fn qcm_generated(evaluation_id: &str, qcm_id: &str) -> String {
    serde_json::json!({
        "type": "qcm_generated",
        "evaluation_id": evaluation_id,
        "qcm": qcm(qcm_id),
        "timestamp": "2024-05-02T10:00:00",
    })
    .to_string()
}

/// Waits for the first update matching `pred`, skipping the rest.
pub async fn next_update<F>(rx: &mut broadcast::Receiver<SessionUpdate>, mut pred: F) -> SessionUpdate
where
    F: FnMut(&SessionUpdate) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(update) if pred(&update) => return update,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("update stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), wait)
        .await
        .expect("timed out waiting for update")
}
