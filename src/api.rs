/// Types and service stubs generated from `src/api/v1/log.proto`.
pub mod v1 {
  tonic::include_proto!("log.v1");
}
