use actix_web::{get, post, web, HttpResponse, Responder};
use tracing::error;

use crate::{
  api,
  commit_log::{CommitLog, CommitLogError},
};

mod viewmodel;

pub fn init(config: &mut web::ServiceConfig) {
  config.service(produce_log).service(consume_log);
}

#[post("/log")]
async fn produce_log(
  log: web::Data<dyn CommitLog>,
  data: web::Json<viewmodel::ProduceRequest>,
) -> impl Responder {
  let record = api::v1::Record {
    value: data.into_inner().value.into_bytes(),
    offset: 0,
  };

  match log.append(record) {
    Ok(offset) => HttpResponse::Ok().json(viewmodel::ProduceResponse { offset }),
    Err(e) => {
      error!("{:#}", e);
      HttpResponse::InternalServerError().finish()
    }
  }
}

#[get("/log/{offset}")]
async fn consume_log(log: web::Data<dyn CommitLog>, path: web::Path<u64>) -> impl Responder {
  match log.read(path.into_inner()) {
    Ok(record) => HttpResponse::Ok().json(viewmodel::ConsumeResponse {
      record: viewmodel::Record::from(record),
    }),
    Err(e) => match e.downcast_ref::<CommitLogError>() {
      Some(CommitLogError::OffsetOutOfBounds(_)) => HttpResponse::NotFound().finish(),
      None => {
        error!("{:#}", e);
        HttpResponse::InternalServerError().finish()
      }
    },
  }
}
