mod controller;
mod handlers;
mod service;

use circuit_core::prelude::*;
use circuit_core::EnvironmentPropertySource;
use circuit_web::exception_handler::ExceptionHandlerRegistry;
use circuit_web::prelude::*;
use circuit_web::ControllerRegistry;
use service::UserService;
use std::sync::Arc;

const CONFIG_FILE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/application.toml");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = Environment::new()
        .with_source(TomlPropertySource::from_file(CONFIG_FILE)?)
        .with_source(EnvironmentPropertySource::new("APP_"));

    LoggingConfig::from_environment(&env, LoggingConfig::from_env()).init()?;

    let services: Arc<ServiceRegistry> =
        Arc::new(ServiceRegistry::new().with("userService", UserService::new()));

    let mut router = Router::builder()
        .properties(RouterProperties::from_environment(&env))
        .cache(Arc::new(MemoryCache::new()))
        .services(services.clone())
        .controllers(ControllerRegistry::from_inventory())
        .exception_handlers(ExceptionHandlerRegistry::from_inventory())
        .middleware("errors", ErrorLogger)
        .middleware("request-id", RequestId)
        .middleware("autowire", AutowireController::new(services))
        .build();

    router.add_preroute_middleware(MiddlewareRef::instance(RequestLogger));

    router
        .define_routes(|routes| {
            routes.get(
                "/",
                CallableHandler::from_fn("home", |_, _| Ok("Circuit is running".into())),
            );
            routes.add_group("/users", [MiddlewareRef::from("autowire")], |users| {
                users.get("", "UserController@list");
                users.get("/{id:\\d+}", "UserController@show");
                users.post("", "UserController@create");
            });
        })
        .await?;

    tracing::info!(
        routes = router.route_table().map(|table| table.len()).unwrap_or(0),
        cached = router.is_cached(),
        "Routes ready"
    );

    CircuitWebServer::new(ServerProperties::from_environment(&env), Arc::new(router))
        .run()
        .await
}
