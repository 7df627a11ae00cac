//! gRPC front-end for the commit log.
//!
//! The server is generic over the [`CommitLog`] capability, so it can serve
//! the durable log in production and the in-memory log in tests.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::error;
use tracing_futures::Instrument;

use crate::{
  api,
  commit_log::{CommitLog, CommitLogError},
};

#[derive(Debug, Clone)]
pub struct LogServer<L> {
  log: Arc<L>,
}

impl<L: CommitLog> LogServer<L> {
  pub fn new(log: Arc<L>) -> Self {
    Self { log }
  }
}

fn error_status(error: &anyhow::Error) -> Status {
  match error.downcast_ref::<CommitLogError>() {
    Some(CommitLogError::OffsetOutOfBounds(offset)) => {
      Status::out_of_range(format!("offset is out of bounds: {}", offset))
    }
    None => {
      error!("{:#}", error);
      Status::unavailable("service unavailable")
    }
  }
}

#[tonic::async_trait]
impl<L: CommitLog + 'static> api::v1::log_server::Log for LogServer<L> {
  async fn produce(
    &self,
    request: Request<api::v1::ProduceRequest>,
  ) -> Result<Response<api::v1::ProduceResponse>, Status> {
    let record = request
      .into_inner()
      .record
      .ok_or_else(|| Status::invalid_argument("request contains no record"))?;

    match self.log.append(record) {
      Ok(offset) => Ok(Response::new(api::v1::ProduceResponse { offset })),
      Err(e) => Err(error_status(&e)),
    }
  }

  async fn consume(
    &self,
    request: Request<api::v1::ConsumeRequest>,
  ) -> Result<Response<api::v1::ConsumeResponse>, Status> {
    match self.log.read(request.into_inner().offset) {
      Ok(record) => Ok(Response::new(api::v1::ConsumeResponse {
        record: Some(record),
      })),
      Err(e) => Err(error_status(&e)),
    }
  }

  type ConsumeStreamStream = ReceiverStream<Result<api::v1::ConsumeResponse, Status>>;

  async fn consume_stream(
    &self,
    request: Request<api::v1::ConsumeRequest>,
  ) -> Result<Response<Self::ConsumeStreamStream>, Status> {
    let mut offset = request.into_inner().offset;

    let (tx, rx) = mpsc::channel(4);
    let log = Arc::clone(&self.log);

    tokio::spawn(
      async move {
        loop {
          match log.read(offset) {
            Ok(record) => {
              let response = api::v1::ConsumeResponse {
                record: Some(record),
              };
              if tx.send(Ok(response)).await.is_err() {
                // Subscriber went away.
                break;
              }
              offset += 1;
            }
            Err(e) => match e.downcast_ref::<CommitLogError>() {
              // The subscriber caught up with the producers. Wait for
              // records to arrive instead of ending the stream.
              Some(CommitLogError::OffsetOutOfBounds(_)) => {
                tokio::time::sleep(Duration::from_millis(100)).await;
              }
              None => {
                let _ = tx.send(Err(error_status(&e))).await;
                break;
              }
            },
          }
        }
      }
      .instrument(tracing::info_span!("consume_stream")),
    );

    Ok(Response::new(ReceiverStream::new(rx)))
  }

  type ProduceStreamStream = ReceiverStream<Result<api::v1::ProduceResponse, Status>>;

  async fn produce_stream(
    &self,
    request: Request<Streaming<api::v1::ProduceRequest>>,
  ) -> Result<Response<Self::ProduceStreamStream>, Status> {
    let mut requests = request.into_inner();

    let (tx, rx) = mpsc::channel(4);
    let log = Arc::clone(&self.log);

    tokio::spawn(
      async move {
        loop {
          match requests.message().await {
            Ok(Some(request)) => {
              let response = match request.record {
                None => Err(Status::invalid_argument("request contains no record")),
                Some(record) => match log.append(record) {
                  Ok(offset) => Ok(api::v1::ProduceResponse { offset }),
                  Err(e) => Err(error_status(&e)),
                },
              };

              let failed = response.is_err();
              if tx.send(response).await.is_err() || failed {
                break;
              }
            }
            // Producer finished its stream.
            Ok(None) => break,
            Err(status) => {
              let _ = tx.send(Err(status)).await;
              break;
            }
          }
        }
      }
      .instrument(tracing::info_span!("produce_stream")),
    );

    Ok(Response::new(ReceiverStream::new(rx)))
  }
}
