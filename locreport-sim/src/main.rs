mod platform;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::bail;
use clap::{Parser, ValueEnum};
use locreport_logic::{
    PermissionStatus, Reporter, ReporterConfig, StateUpdateSender, TriggerOutcome, prelude::*,
};
use locreport_transport::{DeliveryConfig, HttpDeliveryClient};
use log::{info, warn};
use tokio::sync::mpsc;

use platform::{ScriptedFix, ScriptedPlatform, read_script};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Fetch one position and deliver it
    Once,
    /// Watch the scripted positions and deliver each one that passes the filter
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Permission {
    Granted,
    Denied,
    Restricted,
}

impl From<Permission> for PermissionStatus {
    fn from(value: Permission) -> Self {
        match value {
            Permission::Granted => PermissionStatus::Granted,
            Permission::Denied => PermissionStatus::Denied,
            Permission::Restricted => PermissionStatus::Restricted,
        }
    }
}

#[derive(Parser)]
/// Run the location reporter against scripted positions and the backend configured by
/// API_BASE_URL and API_KEY
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Once)]
    mode: Mode,

    /// JSON file holding a list of `{lat, lon, accuracy?, timestamp?}` fixes
    #[arg(long, conflicts_with_all = ["lat", "lon"])]
    fixes: Option<PathBuf>,

    /// Latitude of a single scripted fix
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude of a single scripted fix
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Accuracy in meters of the single scripted fix
    #[arg(long)]
    accuracy: Option<f64>,

    /// Answer the platform gives to the permission prompt
    #[arg(long, value_enum, default_value_t = Permission::Granted)]
    permission: Permission,

    /// Milliseconds between scripted fixes in watch mode
    #[arg(long, default_value_t = 5000)]
    step_ms: u64,
}

struct UpdateSender(mpsc::UnboundedSender<()>);

impl StateUpdateSender for UpdateSender {
    fn send_update(&self) {
        self.0.send(()).ok();
    }
}

type SimReporter = Reporter<ScriptedPlatform, HttpDeliveryClient, UpdateSender>;

async fn load_script(cli: &Cli) -> Result<Vec<ScriptedFix>> {
    if let Some(path) = &cli.fixes {
        read_script(path).await
    } else if let (Some(lat), Some(lon)) = (cli.lat, cli.lon) {
        Ok(vec![ScriptedFix {
            lat,
            lon,
            accuracy: cli.accuracy,
            timestamp: None,
        }])
    } else {
        bail!("Pass either --fixes or --lat and --lon")
    }
}

fn print_state(text: &str) {
    println!("----\n{}", text.trim_end());
}

async fn run_watch(
    reporter: &Arc<SimReporter>,
    platform: &ScriptedPlatform,
    updates: &mut mpsc::UnboundedReceiver<()>,
) {
    let finished = platform.finished();

    if !reporter.is_tracking() {
        if let Err(why) = reporter.start_tracking().await {
            warn!("Couldn't start tracking: {why}");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = finished.cancelled() => {
                // Let the last delivery settle
                tokio::time::sleep(Duration::from_millis(500)).await;
                break;
            }
            Some(()) = updates.recv() => {
                print_state(&reporter.render().await);
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();
    let script = load_script(&cli).await?;

    let config = match cli.mode {
        Mode::Once => ReporterConfig::default(),
        Mode::Watch => ReporterConfig::continuous(),
    };

    let delivery = HttpDeliveryClient::new(DeliveryConfig::from_env())
        .context("Failed to set up delivery")?;
    let platform = Arc::new(ScriptedPlatform::new(
        cli.permission.into(),
        script,
        Duration::from_millis(cli.step_ms),
    ));

    let (tx, mut updates) = mpsc::unbounded_channel();
    let reporter = Arc::new(Reporter::new(
        config,
        platform.clone(),
        delivery,
        UpdateSender(tx),
    ));

    let status = reporter.mount().await;
    info!("Permission: {status:?}");

    if status.is_granted() {
        match cli.mode {
            Mode::Once => {
                if reporter.trigger().await != TriggerOutcome::Finished {
                    warn!("Trigger did not run");
                }
            }
            Mode::Watch => run_watch(&reporter, &platform, &mut updates).await,
        }
    }

    reporter.unmount().await;
    print_state(&reporter.render().await);

    Ok(())
}
