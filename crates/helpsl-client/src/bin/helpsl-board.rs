use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use helpsl_client::{ClientConfig, ListView, ServiceContext, Tab, ViewUpdate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helpsl_client=info,helpsl_board=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let tab = match std::env::args().nth(1).as_deref() {
        None | Some("requests") => Tab::Requests,
        Some("offers") => Tab::Offers,
        Some(other) => anyhow::bail!("unknown tab '{}', expected requests or offers", other),
    };

    let ctx = ServiceContext::from_config(&config).context("building HTTP clients")?;
    match ctx.weather_here(&CancellationToken::new()).await {
        Some(weather) => info!(
            "weather here: {:.1}°C, {:?}",
            weather.temperature_c,
            weather.conditions()
        ),
        None => info!("weather: GPS off"),
    }

    let mut view = ListView::new(ctx, tab);
    view.open().await?;
    print_board(&view);

    loop {
        tokio::select! {
            update = view.pump() => match update {
                Some(ViewUpdate::Stale) => warn!("showing stale data, still reconnecting"),
                Some(_) => print_board(&view),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    view.close();
    Ok(())
}

fn print_board(view: &ListView) {
    let items = view.items();
    info!("{:?}: {} records", view.tab(), items.len());
    for record in items {
        info!(
            "  [{}] {} {} | {} | {} | {}",
            record.status.as_str(),
            record.key(),
            record.kind.as_str(),
            record.name,
            record.phone,
            record.location
        );
    }
}
