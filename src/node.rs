use bitcoincore_rpc::{Auth, Client};

/// Connection parameters for the regtest node. `Client` handles are cheap
/// to construct, so reconnection is simply building a fresh handle from
/// this config rather than patching up a shared global.
#[derive(Clone)]
pub struct NodeConfig {
    url: String,
    user: String,
    pass: String,
}

impl NodeConfig {
    pub fn new(url: &str, user: &str, pass: &str) -> Self {
        Self {
            url: url.to_owned(),
            user: user.to_owned(),
            pass: pass.to_owned(),
        }
    }

    fn auth(&self) -> Auth {
        Auth::UserPass(self.user.clone(), self.pass.clone())
    }

    /// Client for node-level RPCs (wallet load/create/unload).
    pub fn root_client(&self) -> bitcoincore_rpc::Result<Client> {
        Client::new(&self.url, self.auth())
    }

    /// Client bound to a wallet-scoped endpoint path, for wallet RPCs.
    pub fn wallet_client(&self, wallet: &str) -> bitcoincore_rpc::Result<Client> {
        Client::new(&format!("{}/wallet/{wallet}", self.url), self.auth())
    }
}
