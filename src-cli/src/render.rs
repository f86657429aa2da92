//! Bridge from session updates to terminal output.

use evalwatch::broadcast::NoticeLevel;
use evalwatch::model::{Evaluation, QcmItem};
use evalwatch::SessionUpdate;
use log::{debug, info, warn};
use tokio::sync::broadcast;

/// Prints updates until the session goes away.
pub async fn run(mut updates: broadcast::Receiver<SessionUpdate>, json: bool) {
    debug!("Starting update renderer");
    loop {
        match updates.recv().await {
            Ok(update) => {
                let line = if json {
                    serde_json::to_string(&update).ok()
                } else {
                    render(&update)
                };
                if let Some(line) = line {
                    println!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Renderer lagged, missed {} updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("Session closed, stopping renderer");
                break;
            }
        }
    }
}

pub fn render(update: &SessionUpdate) -> Option<String> {
    match update {
        SessionUpdate::Tracking {
            evaluation_id: Some(id),
        } => Some(format!("Tracking evaluation {}", id)),
        SessionUpdate::Tracking {
            evaluation_id: None,
        } => Some("No evaluation tracked".to_string()),
        SessionUpdate::Projection { evaluation, .. } => Some(progress_line(evaluation)),
        SessionUpdate::FeedReset { items } if items.is_empty() => {
            Some("No QCM generated yet".to_string())
        }
        SessionUpdate::FeedReset { items } => Some(format!(
            "{} QCM generated so far, latest: {}",
            items.len(),
            items[0].question
        )),
        SessionUpdate::FeedAppended { item } => Some(qcm_line(item)),
        SessionUpdate::Notice(notice) => {
            let marker = match notice.level {
                NoticeLevel::Info => "i",
                NoticeLevel::Success => "+",
                NoticeLevel::Warning => "!",
                NoticeLevel::Error => "x",
            };
            Some(format!(
                "{} {} {}",
                notice.timestamp.format("%H:%M:%S"),
                marker,
                notice.message
            ))
        }
        SessionUpdate::History { evaluations } => {
            let active = evaluations.iter().filter(|e| e.is_active()).count();
            Some(format!(
                "{} evaluations on record, {} active",
                evaluations.len(),
                active
            ))
        }
        SessionUpdate::Channel { channel, state } => {
            debug!("Channel {} is {}", channel, state);
            None
        }
    }
}

pub fn progress_line(evaluation: &Evaluation) -> String {
    let mut line = format!(
        "[{}] {:>5.1}% {}/{} QCM",
        evaluation.status, evaluation.progress, evaluation.completed_qcm, evaluation.total_qcm
    );
    if let Some(phase) = evaluation.phase {
        line.push_str(&format!(", {} phase", phase));
    }
    if let (Some(batch), Some(total)) = (evaluation.batch, evaluation.total_batches) {
        line.push_str(&format!(", batch {}/{}", batch, total));
    }
    if let Some(error) = &evaluation.error {
        line.push_str(&format!(": {}", error));
    }
    line
}

fn qcm_line(item: &QcmItem) -> String {
    let mut line = format!("+ [{} / {}] {}", item.criterion, item.difficulty, item.question);
    if let Some(answer) = item.correct_choice() {
        line.push_str(&format!(" -> {}: {}", item.correct_answer, answer));
    }
    line
}
