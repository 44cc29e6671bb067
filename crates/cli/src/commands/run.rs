//! `codeloop run` runs one goal and prints the report.

use codeloop_core::TaskStatus;

use crate::host::Host;
use crate::input::LineInput;
use crate::progress;

pub async fn run(goal: String) -> Result<(), Box<dyn std::error::Error>> {
    let input = LineInput::stdin();
    let mut host = Host::build(&input)?;

    let renderer = progress::spawn(host.agent.event_bus());
    let outcome = host.agent.run_task(&goal, &mut host.memory).await;
    renderer.abort();

    println!();
    println!("{}", outcome.report());

    match outcome.status {
        TaskStatus::Completed => Ok(()),
        status => Err(format!("task {status}").into()),
    }
}
