use std::io;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::{Result, eyre};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use tutor_chat::cli::chat::render::render_turn;
use tutor_chat::cli::chat::{ChatContext, ChatOptions};
use tutor_chat::config::Config;
use tutor_chat::session::SessionStore;
use tutor_chat::tutor_client::TutorClient;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Question to ask once, without starting the interactive chat
    #[arg(short, long)]
    input: Option<String>,

    /// Ask in quiz mode
    #[arg(long)]
    quiz: bool,

    /// Ask for a learning path
    #[arg(long)]
    learning_path: bool,

    /// Base URL of the tutor service (overrides TUTOR_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        /// Question to ask once, without starting the interactive chat
        #[arg(short, long)]
        input: Option<String>,

        /// Ask in quiz mode
        #[arg(long)]
        quiz: bool,

        /// Ask for a learning path
        #[arg(long)]
        learning_path: bool,
    },
    /// Log in and store the session token locally
    Login {
        #[arg(short, long)]
        username: String,

        /// Prompted for without echo when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Remove the locally stored session
    Logout,
    /// Print the stored conversation
    History,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    // Answers stream to stdout, so logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| eyre!("Failed to set tracing subscriber: {}", e))?;

    let mut config = Config::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url.trim_end_matches('/').to_string();
    }
    info!("Starting tutor chat against {}", config.api_url);

    let store = SessionStore::default_location()?;

    match cli.command {
        Some(Commands::Chat {
            input,
            quiz,
            learning_path,
        }) => chat(config, &store, input, quiz, learning_path).await,
        Some(Commands::Login { username, password }) => {
            login(&config, &store, &username, password).await
        }
        Some(Commands::Logout) => {
            if store.clear()? {
                println!("Logged out.");
            } else {
                println!("No stored session.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::History) => history(&config, &store).await,
        // Default to chat if no subcommand is provided
        None => chat(config, &store, cli.input, cli.quiz, cli.learning_path).await,
    }
}

async fn chat(
    config: Config,
    store: &SessionStore,
    input: Option<String>,
    quiz: bool,
    learning_path: bool,
) -> Result<ExitCode> {
    let session = store.resolve()?;
    if session.is_none() {
        warn!("No stored session; run `tutor-chat login` to ask questions");
    }

    let client = TutorClient::new(&config, session)?;
    let interactive = input.is_none();

    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        input,
        interactive,
        Box::new(client),
        ChatOptions {
            quiz,
            learning_path,
            progress_policy: config.progress_policy,
        },
    );
    chat_context.run().await
}

async fn login(
    config: &Config,
    store: &SessionStore,
    username: &str,
    password: Option<String>,
) -> Result<ExitCode> {
    let password = password_or_prompt(password, || rpassword::prompt_password("password: "))?;

    let session = TutorClient::login(config, username, &password).await?;
    store.save(&session)?;

    println!(
        "Logged in as {}. Session stored at {}",
        session.display_name(),
        store.path().display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn history(config: &Config, store: &SessionStore) -> Result<ExitCode> {
    let client = TutorClient::new(config, store.resolve()?)?;
    let turns = client.fetch_history().await?;

    let mut stdout = io::stdout();
    for turn in &turns {
        render_turn(&mut stdout, turn)?;
    }
    if turns.is_empty() {
        println!("No messages yet.");
    }
    Ok(ExitCode::SUCCESS)
}

fn password_or_prompt(
    password: Option<String>,
    prompt: impl FnOnce() -> io::Result<String>,
) -> io::Result<String> {
    match password {
        Some(password) => Ok(password),
        None => prompt(),
    }
}
