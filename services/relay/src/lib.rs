pub mod config;
pub mod proxy;

pub use config::{Args, Config, ConfigError, LogFormat};
pub use proxy::{
    parse_backend_list, race, relay, run_session, BackendAddr, BackendList, DialConfig, Dialer,
    Listener, ListenerConfig, ListenerStats, RaceError, RaceStats, RaceWinner, RelayOutcome,
    SessionContext, SessionReport, SessionState, SplitDuplex, TcpDialer,
};
