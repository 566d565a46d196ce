pub mod arr;
pub mod deluge;
pub mod dns;
pub mod docker;
pub mod http;
pub mod notifier;
pub mod plex;
pub mod tls;

pub use arr::ArrClient;
pub use deluge::{CoreConf, DelugeWebClient, TorrentRpc, TorrentSummary};
pub use dns::{
    DnsProvider, DuckDnsProvider, HttpPublicIp, NameResolver, PublicIpSource, SystemResolver,
    UdpResolver,
};
pub use docker::{ContainerControl, DockerCli, ExecOutput};
pub use http::{HttpEndpoint, StatusEndpoint};
pub use notifier::{DiscordNotifier, LogNotifier, Notifier};
pub use plex::{MediaServer, PlexClient, SessionSummary};
pub use tls::{CertInfo, CertificateSource, NativeTlsInspector};
