pub mod gateway;
pub mod ledger;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_server;

pub use gateway::{HttpGatewayClient, HttpGatewayFactory, HttpLedgerGateway};
pub use ledger::{LedgerHelper, MasterWallet, RpcHealth, RpcTimeouts};
