pub mod settings;

pub use settings::{
    Config,
    FlowControlConfig,
    KeepAliveConfig,
    ParityConfig,
    RtuConfig,
    TcpConfig,
    TimingConfig,
    TransportConfig,
};
