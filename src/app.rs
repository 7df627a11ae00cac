/// Builds an actix app serving the commit log routes over the in-memory
/// log. Used by the route tests; the binary mounts the same routes over the
/// durable log.
#[macro_export]
macro_rules! create_app {
  () => {{
    let commit_log: std::sync::Arc<dyn $crate::commit_log::CommitLog> =
      std::sync::Arc::new($crate::commit_log::MemoryLog::new());

    actix_web::App::new()
      .app_data(actix_web::web::Data::from(commit_log))
      .wrap(actix_web::middleware::Logger::default())
      .configure($crate::routes::init)
  }};
}
