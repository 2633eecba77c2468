use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use picnic_api::{PicnicClient, PicnicConfig, format_price, render_category_tree};
use picnic_native_utils::{CpalDevices, device};
use picnic_pal::config::{Config, MatcherKind, PicnicAuth};
use picnic_pal::gemini_adapter::GeminiConnector;
use picnic_pal::speech_adapter::GoogleSpeech;
use picnic_pal_core::cart_matcher::DEFAULT_MATCHER_MODEL;
use picnic_pal_core::{
    CartMatcher, FuzzyCartMatcher, LlmCartMatcher, OrchestratorConfig, SessionConfig,
    SessionOrchestrator, picnic_registry,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice shopping assistant for the Picnic grocery store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the store's category tree
    Categories {
        #[arg(long, default_value_t = 2)]
        depth: u32,
    },
    /// Show the shopping cart
    Cart {
        /// Empty the cart first
        #[arg(long)]
        clear: bool,
    },
    /// List the audio devices cpal can see
    Devices,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:?}", e);
            1
        }
    };
    // Stdin is read on a blocking thread the runtime would otherwise wait for.
    std::process::exit(code);
}

async fn run() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let cli = Cli::parse();

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    match cli.command {
        Some(Command::Categories { depth }) => print_categories(&config, depth).await,
        Some(Command::Cart { clear }) => print_cart(&config, clear).await,
        Some(Command::Devices) => list_devices(),
        None => run_session(config).await,
    }
}

async fn picnic_client(config: &Config) -> Result<PicnicClient> {
    let builder = PicnicConfig::builder().with_country_code(&config.picnic_region);
    let builder = match &config.picnic_auth {
        PicnicAuth::Credentials { username, password } => {
            builder.with_credentials(username, password.clone())
        }
        PicnicAuth::Token(token) => builder.with_auth_token(token.clone()),
    };
    PicnicClient::connect(builder.build())
        .await
        .context("Failed to log in to Picnic")
}

async fn print_categories(config: &Config, depth: u32) -> Result<()> {
    let client = picnic_client(config).await?;
    let categories = client
        .get_categories(depth)
        .await
        .context("Failed to fetch categories")?;
    for line in &render_category_tree(&categories, "") {
        println!("{}", line);
    }
    Ok(())
}

async fn print_cart(config: &Config, clear: bool) -> Result<()> {
    let client = picnic_client(config).await?;
    let cart = if clear {
        client.clear_cart().await.context("Failed to clear the cart")?
    } else {
        client.get_cart().await.context("Failed to fetch the cart")?
    };
    if let Some(code) = cart.error_code() {
        anyhow::bail!("cart request failed with {}", code);
    }

    let lines = cart.lines();
    if lines.is_empty() {
        println!("The cart is empty.");
    }
    for line in lines {
        println!("{} ({}) {}", line.product_name, line.product_id, format_price(line.price));
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    println!("Input devices:");
    for line in device::available_inputs()? {
        println!("{}", line);
    }
    println!("Output devices:");
    for line in device::available_outputs()? {
        println!("{}", line);
    }
    Ok(())
}

async fn run_session(config: Config) -> Result<()> {
    tracing::info!("Configuration loaded successfully. Starting Picnic Pal...");

    // --- 4. Initialize API Clients ---
    let picnic = Arc::new(picnic_client(&config).await?);
    match picnic.get_user().await {
        Ok(user) => tracing::info!(
            "Shopping as {}",
            user.get("firstname").and_then(|name| name.as_str()).unwrap_or("unknown user")
        ),
        Err(e) => tracing::warn!("Failed to fetch user profile: {}", e),
    }
    let matcher: Arc<dyn CartMatcher> = match config.cart_matcher {
        MatcherKind::Fuzzy => Arc::new(FuzzyCartMatcher::default()),
        MatcherKind::Llm => Arc::new(LlmCartMatcher::new(
            config.gemini_api_key.clone(),
            DEFAULT_MATCHER_MODEL.to_string(),
        )),
    };

    // --- 5. Register Tools ---
    let mut registry = picnic_registry(picnic, matcher);
    if let Some(tools) = &config.tools {
        registry.retain(tools);
    }
    tracing::info!("Declared tools: {}", registry.names().join(", "));

    let orchestrator_config = OrchestratorConfig {
        session: SessionConfig {
            model: config.model.clone(),
            response_mode: config.response_mode,
            temperature: 0.0,
            system_instruction: Some(config.system_instruction.clone()),
            tool_manifest: registry.manifest(),
        },
        ..OrchestratorConfig::default()
    };

    // --- 6. Run the Session ---
    let speech = Arc::new(GoogleSpeech::new(
        config.tts_api_key.clone(),
        &config.tts_voice,
        orchestrator_config.playback.sample_rate,
    ));
    let devices = Arc::new(CpalDevices::new(
        config.input_device.clone(),
        config.output_device.clone(),
    ));
    let orchestrator = SessionOrchestrator::new(
        Arc::new(GeminiConnector::new(config.gemini_api_key.clone())),
        Arc::new(registry),
        speech,
        devices,
    );

    orchestrator
        .run(orchestrator_config, BufReader::new(tokio::io::stdin()))
        .await?;
    Ok(())
}
