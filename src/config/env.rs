use super::RelayConfig;

impl RelayConfig {
    /// Override file/default values from process environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override values from `lookup`. Unparseable values are ignored.
    ///
    /// - `PORT`: listen port, keeping the configured host
    /// - `NOSTR_DISABLE_SIG`: `true` disables signature verification
    /// - `NOSTR_UPSTREAM_RELAYS`: comma-separated upstream relay URLs
    /// - `NOSTR_MAX_EVENTS`: store capacity
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                let host = self
                    .server
                    .bind
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                self.server.bind = format!("{}:{}", host, port);
            }
        }
        if let Some(v) = lookup("NOSTR_DISABLE_SIG") {
            if let Ok(b) = v.trim().parse::<bool>() {
                self.nostr.disable_signature = b;
            }
        }
        if let Some(v) = lookup("NOSTR_UPSTREAM_RELAYS") {
            self.upstream.relays = v
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("NOSTR_MAX_EVENTS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.nostr.max_events = Some(n);
            }
        }
    }
}
