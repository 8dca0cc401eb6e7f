//! Test execution against the instrument.

use anyhow::{Result, anyhow};
use console::style;
use hilbridge::{
    CANCELLED_REASON, Channel, Dispatch, GenericResult, StreamEvent, StreamSubscription,
    TestCaseKind, TestSession, TransportResult, Verdict, classify_stream_line,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::session_file::SessionFile;
use crate::{Cli, CliError, use_fancy_output};

/// Spinner redraw interval.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Run command implementation.
pub(crate) fn cmd_run(
    cli: &Cli,
    config: &Config,
    session: &Path,
    json: bool,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let file = SessionFile::load(session)?;
    let payload = file.payload()?;
    let family = file.base_config.family();
    let test_name = file.base_config.test_name();

    let endpoints = config.endpoints(family, cli.host.as_deref(), cli.port);
    let mut client_config = config.client_config();
    let mut stream_config = config.stream_config();
    if let Some(secs) = timeout_secs {
        let timeout = Duration::from_secs(secs);
        client_config = client_config.with_response_timeout(timeout);
        stream_config = stream_config.with_response_timeout(timeout);
    }

    let channel = Channel::new(endpoints.send.clone())
        .with_client_config(client_config)
        .with_stream_config(stream_config);
    let mut test = TestSession::new(family, channel);
    test.submit_configuration(file.base_config)?;

    if !cli.quiet {
        eprintln!(
            "{} Sending {} to {}",
            style("→").cyan(),
            style(test_name).bold(),
            style(&endpoints.send).cyan()
        );
    }

    match test.dispatch(&payload)? {
        Dispatch::Single {
            kind,
            result,
            classified,
        } => report_single(cli, json, test_name, kind, &result, &classified),
        Dispatch::Streaming { kind, subscription } => {
            follow_stream(cli, json, test_name, kind, &subscription)
        },
    }
}

fn report_single(
    cli: &Cli,
    json: bool,
    test_name: &str,
    kind: TestCaseKind,
    result: &TransportResult,
    classified: &GenericResult,
) -> Result<()> {
    debug!("{kind:?} exchange: {result}");

    let failed = matches!(
        classified.verdict,
        Verdict::NoResponse | Verdict::TransportError
    );

    if json {
        let output = serde_json::json!({
            "ok": result.is_ok(),
            "data": {
                "test": test_name,
                "status": result.to_string(),
                "response": result.text(),
                "result": classified,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        // Failures get their status line from the returned error.
        if !cli.quiet && !failed {
            eprintln!("{} {}", style("ℹ").blue(), result);
        }
        let verdict = match classified.verdict {
            Verdict::Pass | Verdict::DataReceived => style(classified.to_string()).green(),
            _ => style(classified.to_string()).red(),
        };
        println!("{verdict}");
        for value in &classified.values {
            println!("  {value}");
        }
    }

    if failed {
        return Err(CliError::Instrument(result.to_string()).into());
    }
    Ok(())
}

fn follow_stream(
    cli: &Cli,
    json: bool,
    test_name: &str,
    kind: TestCaseKind,
    subscription: &StreamSubscription,
) -> Result<()> {
    let token = subscription.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    let pb = if cli.quiet || json || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.enable_steady_tick(TICK_INTERVAL);
        pb
    };
    pb.set_message(format!("Waiting for {test_name} results"));

    let mut lines = 0usize;
    let mut records = 0usize;
    let outcome = loop {
        let Some(event) = subscription.recv() else {
            break Err(anyhow!("stream worker exited without a result"));
        };
        match event {
            StreamEvent::Line { text, seq } => {
                lines = seq;
                let Some(record) = classify_stream_line(kind, &text) else {
                    continue;
                };
                records += 1;
                let rendered = if json {
                    serde_json::to_string(&serde_json::json!({ "seq": seq, "record": record }))?
                } else {
                    format!("{seq:>4}  {record}")
                };
                pb.suspend(|| println!("{rendered}"));
            },
            StreamEvent::Progress(count) => {
                pb.set_message(format!("{count} lines received"));
            },
            StreamEvent::Done(_) if records == 0 => {
                let status = TransportResult::ProtocolError("no parseable records".into());
                break Err(CliError::Instrument(status.to_string()).into());
            },
            StreamEvent::Done(_) => break Ok(()),
            StreamEvent::Failed(reason) if reason == CANCELLED_REASON => {
                break Err(CliError::Cancelled("Interrupted".into()).into());
            },
            StreamEvent::Failed(reason) => break Err(CliError::Instrument(reason).into()),
        }
    };
    pb.finish_and_clear();

    if outcome.is_ok() && !cli.quiet {
        eprintln!(
            "{} {}: {} lines, {} records",
            style("✓").green(),
            test_name,
            lines,
            records
        );
    }
    outcome
}
