// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::Config;
use crate::manager::Manager;
use log::{info, warn};
use tokio::task::JoinSet;

/// Every manager of one configuration, keyed by activation route.
pub struct Supervisor {
    routes: Vec<(String, Manager)>,
}

impl Supervisor {
    pub fn from_config(config: &Config) -> Self {
        let routes = config
            .managers
            .iter()
            .map(|m| {
                let route = config.route(m);
                let manager = Manager::new(m.clone());
                info!("[{}] registered at {route}", manager.name());
                (route, manager)
            })
            .collect();
        Self { routes }
    }

    pub fn managers(&self) -> impl Iterator<Item = &Manager> {
        self.routes.iter().map(|(_, m)| m)
    }

    /// Manager whose route matches `path`. A route ending in `/` matches its
    /// whole subtree, any other route only itself; the longest match wins.
    pub fn route(&self, path: &str) -> Option<&Manager> {
        self.routes
            .iter()
            .filter(|(route, _)| route_matches(route, path))
            .max_by_key(|(route, _)| route.len())
            .map(|(_, m)| m)
    }

    /// Terminate every manager and wait for their processes to be reaped.
    /// Failures are logged, never fatal.
    pub async fn shutdown(&self) {
        let mut tasks = JoinSet::new();
        for manager in self.managers().cloned() {
            tasks.spawn(async move {
                if let Err(e) = manager.shutdown().await {
                    warn!("[{}] error terminating: {e}", manager.name());
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("shutdown task failed: {e}");
            }
        }
    }
}

fn route_matches(route: &str, path: &str) -> bool {
    if route.ends_with('/') {
        path.starts_with(route)
    } else {
        path == route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManagerConfig, StdioPolicy};
    use crate::process::tests::pid_is_gone;
    use crate::state::ManagerState;

    fn config(root_url: &str, routes: &[(&str, &str)]) -> Config {
        Config {
            root_url: root_url.to_string(),
            managers: routes
                .iter()
                .map(|(name, url)| {
                    let mut m = ManagerConfig::new(vec!["/bin/sleep".into(), "300".into()]);
                    m.name = Some(name.to_string());
                    m.url = url.to_string();
                    m.stdout = StdioPolicy::Null;
                    m.stderr = StdioPolicy::Null;
                    m
                })
                .collect(),
        }
    }

    fn routed<'a>(sup: &'a Supervisor, path: &str) -> Option<&'a str> {
        sup.route(path).map(Manager::name)
    }

    #[test]
    fn test_exact_routes() {
        let sup = Supervisor::from_config(&config("/", &[("plex", "plex"), ("jelly", "jellyfin")]));
        assert_eq!(routed(&sup, "/plex"), Some("plex"));
        assert_eq!(routed(&sup, "/jellyfin"), Some("jelly"));
        assert_eq!(routed(&sup, "/plex/web"), None);
        assert_eq!(routed(&sup, "/"), None);
    }

    #[test]
    fn test_subtree_route_and_longest_match() {
        let sup = Supervisor::from_config(&config(
            "/svc/",
            &[("all", ""), ("plex", "plex/"), ("exact", "plex/status")],
        ));
        assert_eq!(routed(&sup, "/svc/anything"), Some("all"));
        assert_eq!(routed(&sup, "/svc/plex/web/index.html"), Some("plex"));
        assert_eq!(routed(&sup, "/svc/plex/status"), Some("exact"));
        assert_eq!(routed(&sup, "/other"), None);
    }

    #[test]
    fn test_empty_route_catches_everything() {
        let sup = Supervisor::from_config(&config("", &[("only", "")]));
        assert_eq!(routed(&sup, "/"), Some("only"));
        assert_eq!(routed(&sup, "/deep/path"), Some("only"));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let sup = Supervisor::from_config(&config("/", &[("a", "a"), ("b", "b")]));
        let a = sup.route("/a").unwrap();
        a.activate().unwrap();
        let pid = a.snapshot().pid.unwrap();
        assert_eq!(a.status(), ManagerState::Running);

        sup.shutdown().await;
        assert!(pid_is_gone(pid), "shutdown returned before pid {pid} was reaped");
        for m in sup.managers() {
            assert_eq!(m.status(), ManagerState::Terminated);
            m.activate().unwrap();
            assert_eq!(m.status(), ManagerState::Terminated);
        }
    }
}
