use std::time::Duration;

use clap::Parser;
use rumqttc::MqttOptions;

use crate::sink::Mqtt;

#[derive(Parser)]
pub struct MqttArgs {
    #[clap(long = "mqtt-host", env = "MQTT_SERVER")]
    pub host: String,

    #[clap(long = "mqtt-port", env = "MQTT_PORT", default_value = "1883")]
    pub port: u16,

    #[clap(long = "mqtt-client-id", env = "MQTT_CLIENT_ID", default_value = "axpert-monitor")]
    pub client_id: String,

    #[clap(long = "mqtt-user", env = "MQTT_USER", requires = "password")]
    pub user: Option<String>,

    #[clap(long = "mqtt-pass", env = "MQTT_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Upper bound on a single publish, so that a stuck broker never stalls polling.
    #[clap(long = "mqtt-publish-timeout", env = "MQTT_PUBLISH_TIMEOUT", default_value = "5s")]
    pub publish_timeout: humantime::Duration,
}

impl MqttArgs {
    pub fn connect(&self) -> Mqtt {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            options.set_credentials(user, password);
        }
        Mqtt::connect(options, self.publish_timeout.into())
    }
}
