//! Renders domain events as progress lines on stderr.

use codeloop_core::{DomainEvent, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

/// Print progress for every event published on `bus` until aborted.
pub fn spawn(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = render(&event) {
                        eprintln!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress renderer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub fn render(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::TaskStarted { goal, .. } => Some(format!("  ▸ {goal}")),
        DomainEvent::IterationStarted { iteration, .. } => {
            Some(format!("  · request {iteration}"))
        }
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => {
            let mark = if *success { "ok" } else { "failed" };
            Some(format!("    {tool_name} {mark} ({duration_ms} ms)"))
        }
        DomainEvent::HistoryCompressed { folded, .. } => {
            Some(format!("  · folded {folded} older messages into the summary"))
        }
        DomainEvent::TaskFinished { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codeloop_core::TaskStatus;

    #[test]
    fn renders_tool_results() {
        let ok = DomainEvent::ToolExecuted {
            task_id: "t".into(),
            tool_name: "read_file".into(),
            call_id: "c1".into(),
            success: true,
            duration_ms: 12,
            timestamp: Utc::now(),
        };
        assert_eq!(render(&ok).unwrap(), "    read_file ok (12 ms)");
    }

    #[test]
    fn finish_is_left_to_the_report() {
        let done = DomainEvent::TaskFinished {
            task_id: "t".into(),
            status: TaskStatus::Completed,
            iterations: 2,
            timestamp: Utc::now(),
        };
        assert!(render(&done).is_none());
    }
}
