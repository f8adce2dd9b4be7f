use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use worklog_sync::application::commands::{
    add_entry_impl, delete_entry_impl, get_entries_impl, list_entries_between_impl,
    list_entries_impl, list_links_impl, modify_entry_impl, summary_impl, unlink_impl, AppState,
    EntryInput,
};
use worklog_sync::application::invalidation::{spawn_invalidation_ticker, InvalidationOutcome};
use worklog_sync::application::resolution::{
    ActivityChoice, PromptKind, ResolutionPrompt, TaskChoice,
};
use worklog_sync::application::sync::{BatchReport, SubmissionStatus};
use worklog_sync::application::workflow::{WorkflowCommand, WorkflowEvent};
use worklog_sync::domain::models::{
    format_duration, Credentials, DaySummary, Entry, LinkTarget,
};
use worklog_sync::infrastructure::error::InfraError;
use worklog_sync::infrastructure::logging::enable_logging;

type StdinLines = Lines<BufReader<Stdin>>;

#[derive(Parser, Debug)]
#[command(name = "worklog", version, about = "Personal worklog with remote time-entry sync")]
struct Cli {
    #[arg(
        long,
        env = "WORKLOG_HOME",
        help = "Workspace directory. Defaults to the current directory"
    )]
    workspace: Option<PathBuf>,
    #[arg(long, short, help = "Echo debug logs to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct EntryArgs {
    #[arg(long, help = "DD/MM/YYYY, YYYY-MM-DD or today")]
    date: Option<String>,
    #[arg(long, help = "Start time as HH:MM")]
    start: Option<String>,
    #[arg(long, help = "End time as HH:MM")]
    end: Option<String>,
    #[arg(long, help = "2h, 1h30m, 45m or H:MM. Ignored when start and end are set")]
    duration: Option<String>,
    #[arg(long = "project")]
    project_code: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

impl From<EntryArgs> for EntryInput {
    fn from(args: EntryArgs) -> Self {
        Self {
            date: args.date,
            start: args.start,
            end: args.end,
            duration: args.duration,
            project_code: args.project_code,
            description: args.description,
            notes: args.notes,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Record a worklog entry")]
    Add {
        #[command(flatten)]
        entry: EntryArgs,
    },
    #[command(about = "List entries, newest first")]
    List {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    #[command(about = "Change fields of an existing entry")]
    Modify {
        id: i64,
        #[command(flatten)]
        entry: EntryArgs,
    },
    #[command(about = "Delete an entry")]
    Delete { id: i64 },
    #[command(about = "Show project code links")]
    Links,
    #[command(about = "Forget the link of a project code")]
    Unlink { project_code: String },
    #[command(about = "Total hours per day and project code")]
    Summary {
        #[arg(long, help = "First day of the range, defaults to today")]
        from: Option<String>,
        #[arg(long, help = "Last day of the range, defaults to today")]
        to: Option<String>,
    },
    #[command(
        about = "Submit entries to the remote, resolving unknown project codes interactively"
    )]
    Sync {
        #[arg(long = "id", help = "Entry id to submit; repeatable")]
        ids: Vec<i64>,
        #[arg(long, help = "First day of the range, defaults to today")]
        from: Option<String>,
        #[arg(long, help = "Last day of the range, defaults to today")]
        to: Option<String>,
    },
    #[command(about = "Run one month-boundary invalidation check")]
    Invalidate,
}

enum Next {
    Send(WorkflowCommand),
    Wait,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sync,
    Invalidate,
}

/// Terminal side of the workflow channel. Reads answers from stdin and tracks whether a
/// login is already on its way, so a second `LoginRequired` does not prompt again.
struct Driver {
    mode: Mode,
    stdin: StdinLines,
    awaiting_login: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "worklog failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), InfraError> {
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let state = AppState::new(workspace_root)?;
    let level = cli.verbose.then_some(LevelFilter::DEBUG);
    enable_logging(state.logs_dir(), level, cli.verbose)?;

    match cli.command {
        Command::Add { entry } => {
            let created = add_entry_impl(&state, entry.into())?;
            print_entries(&[created]);
        }
        Command::List {
            from,
            to,
            limit,
            offset,
        } => {
            let entries = if from.is_some() || to.is_some() {
                let from = from.or_else(|| to.clone()).unwrap_or_else(|| "today".into());
                let to = to.unwrap_or_else(|| "today".into());
                list_entries_between_impl(&state, &from, &to)?
            } else {
                list_entries_impl(&state, limit, offset)?
            };
            print_entries(&entries);
        }
        Command::Modify { id, entry } => {
            let modified = modify_entry_impl(&state, id, entry.into())?;
            print_entries(&[modified]);
        }
        Command::Delete { id } => {
            if !delete_entry_impl(&state, id)? {
                return Err(InfraError::EntryNotFound(id));
            }
            println!("deleted entry {id}");
        }
        Command::Links => {
            for link in list_links_impl(&state)? {
                println!(
                    "{:<16} task={:<10} activity={:<10}{}",
                    link.project_code,
                    describe_target(link.task),
                    describe_target(link.activity),
                    if link.stale { " (stale)" } else { "" }
                );
            }
        }
        Command::Unlink { project_code } => {
            if unlink_impl(&state, &project_code)? {
                println!("unlinked {}", project_code.trim());
            } else {
                println!("no link for {}", project_code.trim());
            }
        }
        Command::Summary { from, to } => {
            let from = from.unwrap_or_else(|| "today".into());
            let to = to.unwrap_or_else(|| "today".into());
            print_summary(&summary_impl(&state, &from, &to)?);
        }
        Command::Sync { ids, from, to } => {
            let entries = if ids.is_empty() {
                let from = from.unwrap_or_else(|| "today".into());
                let to = to.unwrap_or_else(|| "today".into());
                list_entries_between_impl(&state, &from, &to)?
            } else {
                get_entries_impl(&state, &ids)?
            };
            if entries.is_empty() {
                println!("nothing to sync");
            } else {
                drive(&state, Mode::Sync, WorkflowCommand::Submit(entries)).await?;
            }
        }
        Command::Invalidate => drive(&state, Mode::Invalidate, WorkflowCommand::Tick).await?,
    }
    Ok(())
}

/// Runs the workflow on its own task and answers its events until the first command is
/// settled. Sync runs also start the periodic invalidation ticker.
async fn drive(state: &AppState, mode: Mode, first: WorkflowCommand) -> Result<(), InfraError> {
    let workflow = state.build_workflow()?;
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let worker = tokio::spawn(workflow.run(command_rx, event_tx));
    let cancel = CancellationToken::new();
    let ticker = (mode == Mode::Sync).then(|| {
        spawn_invalidation_ticker(
            command_tx.clone(),
            state.config().tick_period(),
            cancel.clone(),
        )
    });
    let mut driver = Driver {
        mode,
        stdin: BufReader::new(tokio::io::stdin()).lines(),
        awaiting_login: false,
    };

    let mut result = send(&command_tx, first).await;
    while result.is_ok() {
        let Some(events) = event_rx.recv().await else {
            break;
        };
        match driver.react(events).await {
            Ok(Next::Send(command)) => result = send(&command_tx, command).await,
            Ok(Next::Wait) => {}
            Ok(Next::Finish) => break,
            Err(error) => result = Err(error),
        }
    }

    cancel.cancel();
    if command_tx.send(WorkflowCommand::Shutdown).await.is_err() {
        debug!("workflow already stopped");
    }
    drop(command_tx);
    if let Some(ticker) = ticker {
        if let Err(error) = ticker.await {
            debug!(error = %error, "ticker join failed");
        }
    }
    if let Err(error) = worker.await {
        debug!(error = %error, "workflow join failed");
    }
    result
}

async fn send(
    commands: &mpsc::Sender<WorkflowCommand>,
    command: WorkflowCommand,
) -> Result<(), InfraError> {
    commands
        .send(command)
        .await
        .map_err(|_| InfraError::Protocol("workflow stopped unexpectedly".to_string()))
}

impl Driver {
    /// Reacts to the events of one handled command. Error-only batches end the run, and
    /// an invalidation run ends once nothing is left to send.
    async fn react(&mut self, events: Vec<WorkflowEvent>) -> Result<Next, InfraError> {
        let mut next = Next::Wait;
        let mut failed = false;
        for event in events {
            match event {
                WorkflowEvent::Prompt(prompt) => {
                    next = Next::Send(ask_choice(&prompt, &mut self.stdin).await?);
                }
                WorkflowEvent::LoginRequired => {
                    if self.awaiting_login {
                        debug!("login already requested");
                    } else if matches!(next, Next::Finish) {
                        println!("session expired, log in again on the next sync");
                    } else {
                        next = self.login().await?;
                    }
                }
                WorkflowEvent::LoginFailed(message) => {
                    println!("login failed: {message}");
                    next = self.login().await?;
                }
                WorkflowEvent::LoggedIn { user_id } => {
                    self.awaiting_login = false;
                    println!("logged in as user {user_id}");
                }
                WorkflowEvent::BatchSubmitted(report) => {
                    print_report(&report);
                    next = Next::Finish;
                }
                WorkflowEvent::ResolutionCancelled => {
                    println!("resolution cancelled, nothing submitted");
                    next = Next::Finish;
                }
                WorkflowEvent::Invalidation(outcome) => print_invalidation(&outcome),
                WorkflowEvent::InvalidationFailed(message) => {
                    if self.mode == Mode::Invalidate {
                        return Err(InfraError::CatalogUnavailable(message));
                    }
                    println!("link invalidation failed: {message}");
                }
                WorkflowEvent::Error(message) => {
                    eprintln!("error: {message}");
                    failed = true;
                }
            }
        }
        let settled = failed || self.mode == Mode::Invalidate;
        if settled && matches!(next, Next::Wait) {
            return Ok(Next::Finish);
        }
        Ok(next)
    }

    async fn login(&mut self) -> Result<Next, InfraError> {
        let credentials = ask_credentials(&mut self.stdin).await?;
        self.awaiting_login = true;
        Ok(Next::Send(WorkflowCommand::Login(credentials)))
    }
}

async fn read_line(stdin: &mut StdinLines, label: &str) -> Result<String, InfraError> {
    println!("{label}");
    match stdin.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => Err(InfraError::Validation("input closed".to_string())),
    }
}

/// The password is read from the terminal without echo; piped input is read as a line.
async fn ask_credentials(stdin: &mut StdinLines) -> Result<Credentials, InfraError> {
    let username = read_line(stdin, "username:").await?;
    let password = if std::io::stdin().is_terminal() {
        tokio::task::spawn_blocking(|| rpassword::prompt_password("password: "))
            .await
            .map_err(|error| InfraError::Protocol(format!("password prompt failed: {error}")))??
    } else {
        read_line(stdin, "password:").await?
    };
    Ok(Credentials::new(username, password))
}

async fn ask_choice(
    prompt: &ResolutionPrompt,
    stdin: &mut StdinLines,
) -> Result<WorkflowCommand, InfraError> {
    let subject = match prompt.kind {
        PromptKind::Task => "task",
        PromptKind::Activity => "activity",
    };
    println!(
        "choose a {subject} for {} ({} more after this)",
        prompt.project_code, prompt.remaining
    );
    for (index, option) in prompt.options.iter().enumerate() {
        println!("  {index:>3}) {}", option.label);
    }

    loop {
        let answer = read_line(stdin, "number, or empty to cancel:").await?;
        if answer.is_empty() {
            return Ok(WorkflowCommand::CancelResolution);
        }
        let Some(option) = answer
            .parse::<usize>()
            .ok()
            .and_then(|index| prompt.options.get(index))
        else {
            println!("'{answer}' is not one of the listed numbers");
            continue;
        };
        return Ok(match (prompt.kind, option.id) {
            (PromptKind::Task, Some(id)) => WorkflowCommand::ChooseTask(TaskChoice::Task(id)),
            (PromptKind::Task, None) => WorkflowCommand::ChooseTask(TaskChoice::SkipUpload),
            (PromptKind::Activity, Some(id)) => {
                WorkflowCommand::ChooseActivity(ActivityChoice::Activity(id))
            }
            (PromptKind::Activity, None) => {
                WorkflowCommand::ChooseActivity(ActivityChoice::SkipActivity)
            }
        });
    }
}

fn describe_target(target: Option<LinkTarget>) -> String {
    match target {
        Some(LinkTarget::Remote(id)) => id.to_string(),
        Some(LinkTarget::Declined) => "skip".to_string(),
        None => "-".to_string(),
    }
}

fn print_entries(entries: &[Entry]) {
    for entry in entries {
        let span = match (entry.start_time, entry.end_time) {
            (Some(start), Some(end)) => {
                format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"))
            }
            _ => String::new(),
        };
        println!(
            "{:>5} {} {:<11} {} {:<12} {}",
            entry.id.map(|id| id.to_string()).unwrap_or_default(),
            entry.date.format("%d/%m/%Y"),
            span,
            format_duration(entry.duration),
            entry.project_code,
            entry.description
        );
    }
}

fn print_summary(days: &[DaySummary]) {
    if days.is_empty() {
        println!("no entries in range");
    }
    for day in days {
        println!("{}", day.date.format("%d/%m/%Y"));
        println!();
        for project in &day.projects {
            let minutes = project.duration.num_minutes();
            println!(
                "Project: {} Hours:{:02}:{:02}",
                project.project_code,
                minutes / 60,
                minutes % 60
            );
            if !project.descriptions.is_empty() {
                println!("{}.", project.descriptions.join(". "));
            }
        }
        println!();
    }
}

fn print_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            SubmissionStatus::Submitted(receipt) => match receipt.time_entry_id {
                Some(id) => format!("submitted as {id}"),
                None => "submitted".to_string(),
            },
            SubmissionStatus::Declined => "skipped".to_string(),
            SubmissionStatus::Unresolved => "no task linked".to_string(),
            SubmissionStatus::Failed(error) => format!("failed: {error}"),
        };
        println!(
            "{:>5} {:<12} {status}",
            outcome.entry_id.map(|id| id.to_string()).unwrap_or_default(),
            outcome.project_code
        );
    }
    println!(
        "{} submitted, {} skipped, {} unresolved, {} failed",
        report.submitted_count(),
        report.declined_count(),
        report.unresolved_count(),
        report.failed_count()
    );
    let retryable = report.retryable_count();
    if retryable > 0 {
        println!("{retryable} failed on a temporary remote error and can be synced again");
    }
}

fn print_invalidation(outcome: &InvalidationOutcome) {
    match outcome {
        InvalidationOutcome::Idle => debug!("no links to invalidate"),
        InvalidationOutcome::Primed { marked } => {
            println!("month ends today, {marked} links marked for revalidation");
        }
        InvalidationOutcome::Reconciled { report, .. } => {
            println!(
                "links revalidated: {} kept, {} removed",
                report.revalidated.len(),
                report.removed.len()
            );
            for code in &report.removed {
                println!("  removed link for {code}");
            }
        }
        InvalidationOutcome::ReauthenticationRequired => {
            println!("stale links need a login before they can be revalidated");
        }
    }
}
