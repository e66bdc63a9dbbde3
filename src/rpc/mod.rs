//! 设备 RPC 层：客户端抽象、HTTP JSON-RPC 实现、挑战-应答握手、会话管理

pub mod handshake;
pub mod http;
pub mod mock;
pub mod session;
pub mod traits;

pub use handshake::{Challenge, ChallengeHandshake, ChallengeScheme, Credentials, GlinetScheme, Handshake};
pub use http::HttpRpcClient;
pub use mock::ScriptedRpcClient;
pub use session::{SessionManager, SessionPhase, DEFAULT_AUTH_INVALID_CODE};
pub use traits::{RpcClient, RpcError};
