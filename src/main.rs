use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use veristore::{
    spawn_notifier, CaptureEngine, CartItem, CartPersistence, CartStore, Customer,
    DeliveryDetails, DeliveryMethod, EventBus, InMemoryCatalog, InMemoryOrderBackend,
    JsonCartPersistence, MemoryUploadSink, MockMediaDevice, MockPaymentGateway,
    OrderCoordinator, PaymentDetails, PaymentMethod, ProductCatalog, RecordingSession,
    RecordingStatus, Route, UploadSink, VerificationFlow, VerificationStatus, VeristoreConfig,
};

#[derive(Parser, Debug)]
#[command(name = "veristore")]
#[command(about = "Storefront with video identity verification for restricted products")]
#[command(version)]
#[command(long_about = "A storefront pipeline that takes an order from cart through \
checkout and payment, then records a short verification clip with a countdown and \
fixed duration and uploads it for review. This binary runs the full flow against \
mock devices and services.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "veristore.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without running the flow")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting veristore v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match VeristoreConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    run_demo_flow(config, args.debug).await
}

/// Drive one order through the whole pipeline: cart, checkout, payment,
/// verification recording, upload, and review.
async fn run_demo_flow(config: VeristoreConfig, debug: bool) -> Result<()> {
    let event_bus = if debug {
        EventBus::with_debug_logging(config.system.event_bus_capacity)
    } else {
        EventBus::new(config.system.event_bus_capacity)
    };
    let notifier = spawn_notifier(&event_bus);

    // Storefront collaborators, all in-memory for the demo run.
    let catalog = InMemoryCatalog::with_demo_products();
    let backend = Arc::new(InMemoryOrderBackend::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let coordinator = Arc::new(OrderCoordinator::new(
        backend,
        gateway,
        config.checkout.clone(),
        event_bus.clone(),
    ));
    let sink = Arc::new(MemoryUploadSink::new(config.verification.clone()));

    // Cart, restored from the durable snapshot if one exists.
    let persistence = JsonCartPersistence::new(&config.system.cart_path);
    let cart = CartStore::from_items(persistence.load().await?);

    let products = catalog.list_products().await;
    info!("Catalog has {} product(s)", products.len());
    for product in &products {
        if let Some(variant) = product.variants.first() {
            cart.add(CartItem {
                product_id: product.id.clone(),
                name: product.name.clone(),
                variant: variant.clone(),
                quantity: 1,
                unit_price: product.price,
                requires_verification: product.requires_verification,
            });
        }
    }
    persistence.save(&cart.items()).await?;
    info!(
        "Cart: {} unit(s), total {:.2} {}",
        cart.unit_count(),
        cart.total(),
        config.checkout.currency
    );

    let customer = Customer {
        name: "Jan Kowalski".to_string(),
        email: "jan@example.com".to_string(),
        phone: "+48 123 456 789".to_string(),
        messenger_handle: None,
    };
    let delivery = DeliveryDetails {
        method: DeliveryMethod::PersonalHandoff,
        locker_code: None,
        pickup_location: Some("Main Square".to_string()),
        cost: 0.0,
    };

    let outcome = coordinator
        .checkout(
            customer,
            cart.to_order_items(),
            delivery,
            PaymentMethod::Card,
            PaymentDetails::Card {
                masked_number: "**** 4242".to_string(),
            },
        )
        .await?;
    let order_id = outcome.order.id.clone();
    info!(
        "Order {} placed, status {}, total {:.2} {}",
        order_id, outcome.order.status, outcome.order.payment.total, outcome.order.payment.currency
    );

    // Payment succeeded; empty the cart and persist the empty snapshot.
    cart.clear();
    persistence.save(&cart.items()).await?;

    match outcome.route {
        Route::Verification { .. } => {
            info!("Order requires identity verification, entering the flow");
            run_verification(&config, &coordinator, sink, &event_bus, &order_id).await?;
        }
        Route::OrderStatus { .. } => {
            info!("No verification required, order goes straight to processing");
        }
    }

    let order = coordinator.get_order(&order_id).await?;
    info!(
        "Final order {}: status {}, verification {:?}",
        order.id, order.status, order.verification_status
    );

    // Let the notifier drain before shutdown.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    notifier.abort();
    Ok(())
}

/// Record the verification clip against the mock camera and submit it
async fn run_verification(
    config: &VeristoreConfig,
    coordinator: &Arc<OrderCoordinator>,
    sink: Arc<MemoryUploadSink>,
    event_bus: &EventBus,
    order_id: &str,
) -> Result<()> {
    let mut flow = VerificationFlow::new(
        Arc::clone(&sink) as Arc<dyn UploadSink>,
        Arc::clone(coordinator),
        event_bus.clone(),
    );
    flow.enter(order_id);
    if let Some(phrase) = flow.instruction_phrase() {
        info!("Instruction: say \"{}\" into the camera", phrase);
    }
    flow.give_consent();
    flow.begin_recording()?;

    let device = Arc::new(MockMediaDevice::new());
    let engine = CaptureEngine::new(device, &config.media, event_bus.clone());
    let mut session = RecordingSession::new(
        engine,
        config.recording.clone(),
        order_id.to_string(),
        event_bus.clone(),
    );

    if session.start().await != RecordingStatus::Ready {
        error!(
            "Camera unavailable: {}",
            session.error_message().unwrap_or("unknown")
        );
        session.acknowledge_error();
        return Ok(());
    }

    info!(
        "Recording: {}s countdown then {}s fixed duration",
        config.recording.countdown_seconds, config.recording.duration_seconds
    );
    if session.run_to_recorded().await != RecordingStatus::Recorded {
        error!(
            "Recording did not complete: {}",
            session.error_message().unwrap_or("unknown")
        );
        session.teardown();
        return Ok(());
    }

    if let Some(artifact) = session.confirm() {
        let verification_id = flow.submit_artifact(artifact).await?;
        info!("Uploaded verification {}", verification_id);

        // Stand in for the reviewer approving the clip.
        coordinator
            .update_verification(order_id, VerificationStatus::Approved)
            .await?;
    }
    session.teardown();
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("veristore={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
        None => fmt::layer()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Veristore Configuration File");
    println!("# This is the default configuration with all available options");
    println!();
    let config = VeristoreConfig::default();
    println!("{}", config.to_toml()?);
    Ok(())
}
