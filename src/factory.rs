use crate::{
    ConnectionKind, ConnectionManager, ConnectionSettings, Driver, Error, MySQLDriver, Result,
};

/// Builds an unconnected driver for the endpoint `settings` describes.
pub fn make_driver(settings: &ConnectionSettings) -> Result<Box<dyn Driver>> {
    match settings.connection_kind() {
        ConnectionKind::MySql => Ok(Box::new(MySQLDriver::from_settings(settings))),
        ConnectionKind::Inherit => Err(Error::msg(
            "Connection settings carry no concrete type to construct",
        )),
    }
}

/// Builds a connection manager whose template worker matches `settings`.
pub fn make_manager(settings: &ConnectionSettings) -> Result<ConnectionManager> {
    Ok(ConnectionManager::new(make_driver(settings)?, settings))
}
