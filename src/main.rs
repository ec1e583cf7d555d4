use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use taskboard::config::Config;
use taskboard::core::task::{Task, TaskId};
use taskboard::session::TaskSession;
use taskboard::sync::auth::{AuthClient, AuthContext};
use taskboard::sync::gateway::Attachment;
use taskboard::sync::keyring;
use taskboard::sync::realtime::RealtimeFeed;
use taskboard::sync::supabase::SupabaseClient;
use taskboard::sync::{ChangeEvent, FeedMessage};

/// Access tokens live for an hour; renew well before that while watching.
const SESSION_RENEWAL: Duration = Duration::from_secs(45 * 60);

#[derive(Parser)]
#[command(
    name = "taskboard",
    version,
    about = "Keep a hosted task board in sync from the terminal",
    long_about = None
)]
struct Cli {
    /// Log debug messages to the journal.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the backend url and anon key to the config file
    Init {
        #[arg(long, env = "TASKBOARD_URL")]
        url: String,

        #[arg(long, env = "TASKBOARD_ANON_KEY")]
        anon_key: String,
    },

    /// Sign in and remember the session
    SignIn { email: String, password: String },

    /// Create an account
    SignUp { email: String, password: String },

    /// Forget the stored session
    SignOut,

    /// Print every task
    List,

    /// Create a task
    Add {
        /// Title words, joined with spaces
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,

        #[arg(long)]
        description: Option<String>,

        /// Image file to upload and attach
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Change an existing task
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Delete a task
    Delete { id: String },

    /// Print the list and follow live changes until interrupted
    Watch,
}

fn install_logger(config: &Config) {
    // Logs go to the systemd user journal (`journalctl --user -t taskboard -f`).
    // Wrapper filters: taskboard at info/debug (per config), everything else at warn.
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            if metadata.target().starts_with("taskboard") {
                let max = if taskboard::debug_logging() { log::LevelFilter::Debug } else { log::LevelFilter::Info };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    taskboard::set_debug_logging(config.debug_logging);

    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(j) => j.with_syslog_identifier("taskboard".to_string()),
        Err(e) => {
            eprintln!("journal unavailable, logging disabled: {}", e);
            return;
        }
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max must be Debug so taskboard debug logs can pass through when toggled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

/// Sign in silently with the refresh token from the keyring, if there is one.
async fn restore_session(config: &Config, auth: &AuthClient) -> AuthContext {
    let token = match keyring::load_refresh_token(&config.url).await {
        Ok(Some(t)) => t,
        Ok(None) => return auth.current(),
        Err(e) => {
            log::warn!("{}", e);
            return auth.current();
        }
    };
    match auth.refresh(&token).await {
        Ok(ctx) => {
            remember(config, &ctx).await;
            ctx
        }
        Err(e) => {
            log::warn!("Stored session could not be refreshed: {}", e);
            auth.current()
        }
    }
}

async fn remember(config: &Config, ctx: &AuthContext) {
    if let Some(ref token) = ctx.refresh_token {
        if let Err(e) = keyring::store_refresh_token(&config.url, token).await {
            log::warn!("{}", e);
        }
    }
}

fn print_task(task: &Task) {
    println!("[{}] {}", task.id, task.title);
    if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
        println!("    {}", description);
    }
    if let Some(ref url) = task.image_url {
        println!("    image: {}", url);
    }
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
    }
    for task in tasks {
        print_task(task);
    }
}

fn attach_image(
    session: &mut TaskSession<SupabaseClient>,
    image: Option<PathBuf>,
) -> taskboard::Result<()> {
    if let Some(path) = image {
        session.form_mut().attach(Attachment::load(&path)?);
    }
    Ok(())
}

/// Trade the session's refresh token for a fresh one so writes keep working
/// during a long watch.
async fn renew_session(
    config: &Config,
    auth: &AuthClient,
    session: &mut TaskSession<SupabaseClient>,
) {
    let Some(token) = session.auth().refresh_token.clone() else {
        return;
    };
    match auth.refresh(&token).await {
        Ok(ctx) => {
            remember(config, &ctx).await;
            session.set_auth(ctx);
        }
        Err(e) => log::warn!("Session renewal failed: {}", e),
    }
}

fn init(mut config: Config, url: String, anon_key: String) -> taskboard::Result<()> {
    config.url = url;
    config.anon_key = anon_key;
    config.validate()?;
    config.save()?;
    println!("Wrote {}", Config::path().display());
    Ok(())
}

enum Wake {
    Feed(Option<FeedMessage>),
    Renew,
    Stop,
}

async fn open_session(
    config: &Config,
    auth_client: &AuthClient,
) -> taskboard::Result<TaskSession<SupabaseClient>> {
    let ctx = restore_session(config, auth_client).await;
    let gateway = Arc::new(SupabaseClient::new(
        &config.url,
        &config.anon_key,
        &config.table,
        &config.bucket,
    )?);
    Ok(TaskSession::new(gateway, ctx, config.session_options()))
}

async fn run(config: Config, command: Commands) -> taskboard::Result<()> {
    if let Commands::Init { url, anon_key } = command {
        return init(config, url, anon_key);
    }
    config.validate()?;

    let auth_client = AuthClient::new(&config.url, &config.anon_key)?;

    match command {
        Commands::Init { .. } => {} // written above, before validation
        Commands::SignIn { email, password } => {
            let ctx = auth_client.sign_in(&email, &password).await?;
            remember(&config, &ctx).await;
            println!("Signed in as {}", ctx.email.as_deref().unwrap_or(&email));
        }
        Commands::SignUp { email, password } => {
            match auth_client.sign_up(&email, &password).await? {
                Some(ctx) => {
                    remember(&config, &ctx).await;
                    println!("Signed in as {}", ctx.email.as_deref().unwrap_or(&email));
                }
                None => println!("Check {} to confirm the account, then sign in.", email),
            }
        }
        Commands::SignOut => {
            let ctx = restore_session(&config, &auth_client).await;
            if ctx.is_signed_in() {
                auth_client.sign_out(&ctx).await?;
            }
            keyring::delete_refresh_token(&config.url).await?;
            println!("Signed out.");
        }
        Commands::List => {
            let mut session = open_session(&config, &auth_client).await?;
            session.start::<RealtimeFeed>(None, &config.scope()).await?;
            print_tasks(session.tasks());
        }
        Commands::Add {
            title,
            description,
            image,
        } => {
            let mut session = open_session(&config, &auth_client).await?;
            session.form_mut().set_title(title.join(" "));
            if let Some(d) = description {
                session.form_mut().set_description(d);
            }
            attach_image(&mut session, image)?;
            let task = session.submit().await?;
            print_task(&task);
        }
        Commands::Edit {
            id,
            title,
            description,
            image,
        } => {
            let mut session = open_session(&config, &auth_client).await?;
            let id = TaskId::new(id);
            session.refresh().await?;
            session.task(&id)?;
            session.edit(&id);
            if let Some(t) = title {
                session.form_mut().set_title(t);
            }
            if let Some(d) = description {
                session.form_mut().set_description(d);
            }
            attach_image(&mut session, image)?;
            let task = session.submit().await?;
            print_task(&task);
        }
        Commands::Delete { id } => {
            let mut session = open_session(&config, &auth_client).await?;
            let id = TaskId::new(id);
            session.delete(Some(&id)).await?;
            println!("Deleted {}", id);
        }
        Commands::Watch => {
            let mut session = open_session(&config, &auth_client).await?;
            let feed = config
                .realtime
                .then(|| RealtimeFeed::new(&config.url, &config.anon_key))
                .transpose()?;
            session.start(feed.as_ref(), &config.scope()).await?;
            print_tasks(session.tasks());

            let mut renewal = tokio::time::interval(SESSION_RENEWAL);
            renewal.tick().await;
            loop {
                let wake = tokio::select! {
                    m = session.next_event() => Wake::Feed(m),
                    _ = renewal.tick() => Wake::Renew,
                    _ = tokio::signal::ctrl_c() => Wake::Stop,
                };
                match wake {
                    Wake::Feed(Some(FeedMessage::Change(change))) => {
                        match &change {
                            ChangeEvent::Insert(t) => println!("+ {}", t.title),
                            ChangeEvent::Update(t) => println!("~ {}", t.title),
                            ChangeEvent::Delete(t) => println!("- {}", t.id),
                        }
                        print_tasks(session.tasks());
                    }
                    Wake::Feed(Some(FeedMessage::Status(status))) => println!("({})", status),
                    Wake::Renew => renew_session(&config, &auth_client, &mut session).await,
                    Wake::Feed(None) | Wake::Stop => break,
                }
            }
            session.close().await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.debug_logging |= cli.debug;
    install_logger(&config);

    if let Err(e) = run(config, cli.command).await {
        log::error!("{}", e);
        if e.is_remote() {
            eprintln!("error talking to the backend: {}", e);
        } else {
            eprintln!("error: {}", e);
        }
        std::process::exit(1);
    }
    Ok(())
}
