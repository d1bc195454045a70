// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::sync::Arc;

use rocket::config::LogLevel;
use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};
use tokio::sync::watch;

use super::api::{self, ConfigView};
use crate::config::Config;
use crate::thermal_regulation::StatePublisher;

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new("Access-Control-Allow-Methods", "GET, OPTIONS"));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
    }
}

/// Rocket settings derived from the visualization configuration.
///
/// Signal handling is left to the daemon, which stops Rocket itself once the
/// controllers are drained.
pub fn figment_from_config(config: &Config) -> Figment {
    rocket::Config::figment()
        .merge(("ident", config.visualization.name.clone()))
        .merge(("limits", Limits::new().limit("json", 1.mebibytes())))
        .merge(("address", config.visualization.address.clone()))
        .merge(("port", config.visualization.port))
        .merge(("log_level", LogLevel::Critical))
        .merge(("shutdown.ctrlc", false))
        .merge(("shutdown.signals", Vec::<String>::new()))
}

/// Build the status API server
pub fn build_rocket(
    figment: Figment,
    publisher: StatePublisher,
    config: watch::Receiver<Arc<Config>>,
) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(CORS)
        .mount("/", api::root_routes())
        .mount("/api", api::api_routes())
        .manage(publisher)
        .manage(ConfigView(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;
    use rocket::local::asynchronous::Client;

    #[rocket::async_test]
    async fn test_cors_headers_present() {
        let (publisher, _task) = StatePublisher::spawn(4);
        let (_tx, rx) = watch::channel(Arc::new(Config::default()));
        let figment = figment_from_config(&Config::default()).merge(("port", 0));
        let client = Client::tracked(build_rocket(figment, publisher, rx))
            .await
            .unwrap();

        let response = client.get("/ping").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
        assert_eq!(response.into_string().await.unwrap(), "pong");
    }
}
