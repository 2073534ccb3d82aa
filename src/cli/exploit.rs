use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use console::style;
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor, ExternalPrinter as _};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use crate::batch::BatchSettings;
use crate::catalog::ServiceKey;
use crate::errors::BreachlineError;
use crate::events::ConsoleEvent;
use crate::render::renderer::{render_event, render_state};
use crate::session::{ExploitSession, SessionState};
use crate::wizard::ExploitWizard;
use super::commands::ExploitArgs;
use super::runtime::{prepare_execution, Runtime};
use tracing::{debug, info};

pub async fn handle_exploit(args: ExploitArgs, quiet: bool) -> Result<(), BreachlineError> {
    let target: ServiceKey = args.target.parse().map_err(BreachlineError::Config)?;
    let runtime = Runtime::from_args(&args.runtime).await?;

    let (event_tx, event_rx) = mpsc::unbounded_channel::<ConsoleEvent>();
    let wizard = runtime.wizard(BatchSettings::from_config(&runtime.config))
        .with_event_channel(event_tx);

    prepare_execution(&wizard, Some(std::slice::from_ref(&target))).await?;
    let session = wizard.focus(&target).await?;

    if args.interactive {
        return run_interactive(&wizard, &session, event_rx, &args.commands).await;
    }

    let printer = tokio::spawn(print_events(event_rx, quiet));
    let result = run_unattended(&wizard, &session, &args.commands).await;
    wizard.unmount().await;
    drop(session);
    drop(wizard);
    // Sessions and the wizard hold the only senders; the printer drains and exits
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    result
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ConsoleEvent>, quiet: bool) {
    while let Some(event) = rx.recv().await {
        if quiet && !matches!(event, ConsoleEvent::LogAppended { .. }) {
            continue;
        }
        if let Some(line) = render_event(&event) {
            println!("{}", line);
        }
    }
}

/// Launch, send any scripted commands and wait for a terminal state. Ctrl-C stops the session.
async fn run_unattended(
    wizard: &ExploitWizard,
    session: &ExploitSession,
    commands: &[String],
) -> Result<(), BreachlineError> {
    wizard.launch().await?;
    for command in commands {
        wizard.send_command(command).await?;
    }

    let state = tokio::select! {
        state = session.wait_terminal() => state,
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                info!("Interrupted, stopping session");
                stop_if_running(wizard, session).await;
            }
            session.wait_terminal().await
        }
    };
    finish(session, state).await
}

async fn run_interactive(
    wizard: &ExploitWizard,
    session: &ExploitSession,
    mut event_rx: mpsc::UnboundedReceiver<ConsoleEvent>,
    commands: &[String],
) -> Result<(), BreachlineError> {
    let config = Config::builder()
        .auto_add_history(true)
        .build();
    let mut editor = DefaultEditor::with_config(config)
        .map_err(|e| BreachlineError::Internal(format!("Failed to initialize prompt: {}", e)))?;

    // Print session output above the prompt while readline is active
    let printer = editor.create_external_printer()
        .map_err(|e| BreachlineError::Internal(format!("Failed to create printer: {}", e)))?;
    let printer = Arc::new(Mutex::new(printer));
    let printer_clone = Arc::clone(&printer);
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Some(line) = render_event(&event) {
                let mut p = printer_clone.lock().await;
                let _ = p.print(format!("{}\n", line));
            }
        }
    });

    wizard.launch().await?;
    for command in commands {
        wizard.send_command(command).await?;
    }

    println!(
        "  {} type commands for the session, {} to stop it, {} to leave",
        style("›").cyan(),
        style("/stop").bold(),
        style("/quit").bold(),
    );

    loop {
        if session.state().await.is_terminal() {
            break;
        }

        // rustyline is blocking, so use spawn_blocking
        let reading = tokio::task::spawn_blocking(move || {
            let prompt = format!("{} ", style("breachline>").cyan().bold());
            let result = editor.readline(&prompt);
            (editor, result)
        });
        let hint_printer = Arc::clone(&printer);
        let joined = read_or_notice_finish(reading, session, |state| async move {
            let mut p = hint_printer.lock().await;
            let _ = p.print(finished_hint(state));
        })
        .await;
        let (returned, readline) = joined
            .map_err(|e| BreachlineError::Internal(format!("Readline task failed: {}", e)))?;
        editor = returned;

        match readline {
            Ok(line) => match line.trim() {
                "" => continue,
                "/quit" | "/exit" => {
                    stop_if_running(wizard, session).await;
                    break;
                }
                "/stop" => {
                    if let Err(e) = wizard.stop().await {
                        eprintln!("  {} {}", style("✗").red(), e);
                    }
                }
                text => {
                    match wizard.send_command(text).await {
                        Err(e) if e.classify().user_visible => {
                            eprintln!("  {} {}", style("✗").red(), e);
                        }
                        Err(e) => debug!(error = %e, "Command not sent"),
                        Ok(()) => {}
                    }
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                stop_if_running(wizard, session).await;
                break;
            }
            Err(e) => return Err(BreachlineError::Internal(format!("Readline error: {}", e))),
        }
    }

    let state = session.state().await;
    let summary = finish(session, state).await;
    wizard.unmount().await;
    event_task.abort();
    summary
}

/// Await a pending read; if the session ends first, run `on_finish` and keep waiting.
async fn read_or_notice_finish<T, F, Fut>(
    mut reading: JoinHandle<T>,
    session: &ExploitSession,
    on_finish: F,
) -> Result<T, JoinError>
where
    F: FnOnce(SessionState) -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        joined = &mut reading => joined,
        state = session.wait_terminal() => {
            on_finish(state).await;
            reading.await
        }
    }
}

/// Shown above the prompt once the session ends while a line is being read.
fn finished_hint(state: SessionState) -> String {
    format!(
        "  {} session {}, press {} to leave\n",
        style("›").cyan(),
        render_state(state),
        style("Enter").bold(),
    )
}

async fn stop_if_running(wizard: &ExploitWizard, session: &ExploitSession) {
    if matches!(session.state().await, SessionState::Launching | SessionState::Running) {
        if let Err(e) = wizard.stop().await {
            debug!(error = %e, "Stop on exit failed");
        }
    }
}

async fn finish(session: &ExploitSession, state: SessionState) -> Result<(), BreachlineError> {
    let flags = session.flags().await;
    println!(
        "\n  {} {} | root access: {} | shell opened: {}\n",
        style(session.key()).white().bold(),
        render_state(state),
        if flags.root_access { style("yes").red().bold() } else { style("no").dim() },
        if flags.shell_opened { style("yes").magenta() } else { style("no").dim() },
    );
    Ok(())
}
