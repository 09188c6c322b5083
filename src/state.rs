use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    services::{
        notifications::{LogNotifier, OrderNotifier},
        payment_gateway::{PaymentGateway, gateway_from_config},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn OrderNotifier>,
}

impl AppState {
    /// Wires the gateway from config and logs notifications.
    pub fn new(orm: DatabaseConnection, config: AppConfig) -> Self {
        let payments = gateway_from_config(&config);
        Self {
            orm,
            config: Arc::new(config),
            payments,
            notifier: Arc::new(LogNotifier),
        }
    }
}
