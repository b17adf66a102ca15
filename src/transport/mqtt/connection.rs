//! Pure translation of connection parameters into rumqttc options

use crate::config::{ConnectionConfig, TransportScheme};
use crate::transport::{QosLevel, TransportError};
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use url::Url;

/// Capacity of the request channel between AsyncClient and EventLoop
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Build rumqttc options from a connection config
pub fn configure_mqtt_options(config: &ConnectionConfig) -> Result<MqttOptions, TransportError> {
    let broker_url = config.broker_url();
    let url =
        Url::parse(&broker_url).map_err(|_| TransportError::InvalidBrokerUrl(broker_url.clone()))?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.clone()))?;
    let port = url.port().unwrap_or(config.port);

    // Websocket transports take the full URL as the broker address
    let mut options = if config.scheme.is_websocket() {
        MqttOptions::new(&config.client_id, url.as_str(), port)
    } else {
        MqttOptions::new(&config.client_id, host, port)
    };

    match config.scheme {
        TransportScheme::Ws => {
            options.set_transport(RumqttcTransport::Ws);
        }
        TransportScheme::Wss => {
            options.set_transport(RumqttcTransport::wss_with_default_config());
        }
        TransportScheme::Mqtts => {
            options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        TransportScheme::Mqtt => {}
    }

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        options.set_credentials(username, password);
    }

    options.set_keep_alive(config.keep_alive);
    options.set_clean_start(true);

    Ok(options)
}

pub fn to_rumqttc_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}
