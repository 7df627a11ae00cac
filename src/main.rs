use std::{env, net::SocketAddr, sync::Arc};

use actix_web::{middleware, web::Data, App, HttpServer};
use anyhow::Result;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use seglog::{api, commit_log::CommitLog, config::Config, log::Log, routes, server::LogServer};

#[actix_web::main]
async fn main() -> Result<()> {
  dotenv().ok();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let host = env::var("HOST").unwrap_or_else(|_| String::from("127.0.0.1"));
  let http_port: u16 = env::var("HTTP_PORT")
    .ok()
    .and_then(|port| port.parse().ok())
    .unwrap_or(8080);
  let grpc_port: u16 = env::var("GRPC_PORT")
    .ok()
    .and_then(|port| port.parse().ok())
    .unwrap_or(8400);
  let directory = env::var("LOG_DIR").unwrap_or_else(|_| String::from("data"));

  let log = Arc::new(Log::new(directory, Config::default())?);

  let grpc_address: SocketAddr = format!("{}:{}", host, grpc_port).parse()?;
  info!("starting grpc server at {}", grpc_address);
  let grpc_server = tonic::transport::Server::builder()
    .add_service(api::v1::log_server::LogServer::new(LogServer::new(
      Arc::clone(&log),
    )))
    .serve(grpc_address);

  let commit_log: Data<dyn CommitLog> = Data::from(log as Arc<dyn CommitLog>);
  info!("starting http server at {}:{}", host, http_port);
  let http_server = HttpServer::new(move || {
    App::new()
      .app_data(commit_log.clone())
      .wrap(middleware::Logger::default())
      .configure(routes::init)
  })
  .bind((host.as_str(), http_port))?
  .run();

  tokio::select! {
    result = grpc_server => result?,
    result = http_server => result?,
  }

  Ok(())
}
