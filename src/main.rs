use std::convert::Infallible;
use std::sync::Arc;

use hyper::service::make_service_fn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bio_links::{api, config::Config, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bio_links=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let server = Arc::new(api::ServerInner::new(&config)?);
    tracing::info!(
        database = %config.database_path.display(),
        uploads = %config.upload_dir.display(),
        "store ready"
    );

    let routes = api::routes(&server);
    let make_svc = make_service_fn(move |_| {
        let svc = warp::service(routes.clone());
        async move { Ok::<_, Infallible>(svc) }
    });

    tracing::info!("listening on http://{}", config.bind_addr);

    hyper::Server::try_bind(&config.bind_addr)?
        .serve(make_svc)
        .await?;

    Ok(())
}
