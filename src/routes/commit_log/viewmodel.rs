use serde::{Deserialize, Serialize};

use crate::api;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ProduceRequest {
  pub value: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ProduceResponse {
  pub offset: u64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumeResponse {
  pub record: Record,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub value: String,
  pub offset: u64,
}

impl From<api::v1::Record> for Record {
  fn from(record: api::v1::Record) -> Self {
    Self {
      value: String::from_utf8_lossy(&record.value).into_owned(),
      offset: record.offset,
    }
  }
}
