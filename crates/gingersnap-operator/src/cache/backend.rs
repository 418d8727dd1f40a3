//! Backend server configuration files

use gingersnap_api::{Backend, Cache};

/// Config map key holding the Infinispan server configuration
pub(crate) const INFINISPAN_CONFIG: &str = "infinispan.xml";
/// Config map key holding the Redis server configuration
pub(crate) const REDIS_CONFIG: &str = "redis.conf";
/// Mount path of the configuration volume
pub(crate) const CONFIG_MOUNT: &str = "/config";

/// Port used for cluster membership traffic
pub(crate) const fn discovery_port(backend: Backend) -> (&'static str, i32) {
    match backend {
        Backend::Infinispan => ("ping", 8888),
        Backend::Redis => ("cluster-bus", 16379),
    }
}

/// Container arguments pointing the server at its configuration
pub(crate) fn container_args(backend: Backend) -> Vec<String> {
    match backend {
        Backend::Infinispan => vec!["-c".to_string(), format!("{CONFIG_MOUNT}/{INFINISPAN_CONFIG}")],
        Backend::Redis => vec![format!("{CONFIG_MOUNT}/{REDIS_CONFIG}")],
    }
}

pub(crate) fn infinispan_xml(cache: &Cache) -> String {
    let transport = if cache.is_clustered() {
        format!(
            r#"<transport cluster="{name}" stack="kubernetes" node-name="${{infinispan.node.name:}}"/>"#,
            name = cache.cache_service().name
        )
    } else {
        String::new()
    };
    format!(
        r#"<infinispan
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xsi:schemaLocation="urn:infinispan:config:14.0 https://infinispan.org/schemas/infinispan-config-14.0.xsd
                        urn:infinispan:server:14.0 https://infinispan.org/schemas/infinispan-server-14.0.xsd"
    xmlns="urn:infinispan:config:14.0"
    xmlns:server="urn:infinispan:server:14.0">
  <cache-container name="default" statistics="true">
    {transport}
  </cache-container>
  <server xmlns="urn:infinispan:server:14.0">
    <interfaces>
      <interface name="public">
        <inet-address value="${{infinispan.bind.address:127.0.0.1}}"/>
      </interface>
    </interfaces>
    <socket-bindings default-interface="public" port-offset="${{infinispan.socket.binding.port-offset:0}}">
      <socket-binding name="default" port="${{infinispan.bind.port:{port}}}"/>
    </socket-bindings>
    <endpoints socket-binding="default"/>
  </server>
</infinispan>
"#,
        port = Backend::Infinispan.port(),
    )
}

pub(crate) fn redis_conf(cache: &Cache) -> String {
    let mut conf = format!("port {}\nbind 0.0.0.0\nprotected-mode no\n", Backend::Redis.port());
    if cache.is_clustered() {
        conf.push_str("cluster-enabled yes\ncluster-config-file /data/nodes.conf\n");
    }
    conf
}
