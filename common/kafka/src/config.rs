use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "false")]
    pub verify_ssl_certificate: bool,

    // CDC consumers replay a compacted config stream, so they start from the
    // beginning by default.
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    // Interval (in milliseconds) between commits of stored offsets
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,
}

impl From<&KafkaConfig> for ClientConfig {
    fn from(config: &KafkaConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000");

        if config.kafka_tls {
            client_config.set("security.protocol", "ssl").set(
                "enable.ssl.certificate.verification",
                config.verify_ssl_certificate.to_string(),
            );
        };
        client_config
    }
}
