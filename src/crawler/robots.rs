//! Minimal robots.txt parser and per-host cache.
//!
//! Rules are matched by path prefix; `Allow` overrides `Disallow`. A missing
//! or unreachable robots.txt permits everything.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    rules: HashMap<String, AgentRules>,
    default_rules: AgentRules,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
}

impl RobotsTxt {
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // A new block starts once rules were recorded; consecutive
                    // user-agent lines share the following rule block.
                    if !current_agents.is_empty() && !is_empty_rules(&current_rules) {
                        flush(&mut robots, &current_agents, &current_rules);
                        current_rules = AgentRules::default();
                        current_agents.clear();
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    if !value.is_empty() {
                        current_rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    if !value.is_empty() {
                        current_rules.allow.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if !current_agents.is_empty() {
            flush(&mut robots, &current_agents, &current_rules);
        }
        robots
    }

    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let agent_lower = user_agent.to_lowercase();
        let rules = self
            .rules
            .iter()
            .find(|(name, _)| agent_lower.contains(name.as_str()))
            .map(|(_, rules)| rules)
            .unwrap_or(&self.default_rules);

        // Allow rules take precedence over disallow rules.
        if rules.allow.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }
        !rules
            .disallow
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

fn is_empty_rules(rules: &AgentRules) -> bool {
    rules.disallow.is_empty() && rules.allow.is_empty()
}

fn flush(robots: &mut RobotsTxt, agents: &[String], rules: &AgentRules) {
    for agent in agents {
        if agent == "*" {
            robots.default_rules = rules.clone();
        } else {
            robots.rules.insert(agent.clone(), rules.clone());
        }
    }
}

/// Fetches robots.txt once per host and caches it for the crawl run.
pub struct RobotsCache {
    client: Client,
    per_host: Mutex<HashMap<String, Arc<RobotsTxt>>>,
}

impl RobotsCache {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            per_host: Mutex::new(HashMap::new()),
        }
    }

    pub async fn for_url(&self, url: &Url) -> Arc<RobotsTxt> {
        let host = match url.host_str() {
            Some(host) => host.to_string(),
            None => return Arc::new(RobotsTxt::default()),
        };

        if let Some(cached) = self.per_host.lock().await.get(&host) {
            return cached.clone();
        }

        let robots = Arc::new(self.fetch(url, &host).await);
        self.per_host.lock().await.insert(host, robots.clone());
        robots
    }

    async fn fetch(&self, url: &Url, host: &str) -> RobotsTxt {
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host_with_port(url, host));
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsTxt::parse(&body),
                Err(_) => RobotsTxt::default(),
            },
            // No robots.txt (or an error fetching it) permits everything.
            _ => RobotsTxt::default(),
        }
    }
}

fn host_with_port(url: &Url, host: &str) -> String {
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_rules() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /private/\nDisallow: /admin\nAllow: /private/public/\n",
        );
        assert!(!robots.is_allowed("AnyBot", "/private/secret"));
        assert!(!robots.is_allowed("AnyBot", "/admin"));
        assert!(robots.is_allowed("AnyBot", "/private/public/page"));
        assert!(robots.is_allowed("AnyBot", "/docs"));
    }

    #[test]
    fn specific_agent_overrides_default() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: goodbot\nAllow: /\n",
        );
        assert!(!robots.is_allowed("BadBot", "/page"));
        assert!(robots.is_allowed("GoodBot/1.0", "/page"));
    }

    #[test]
    fn empty_robots_allows_everything() {
        let robots = RobotsTxt::parse("");
        assert!(robots.is_allowed("AnyBot", "/anything"));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let robots = RobotsTxt::parse("# nothing to see\n\nUser-agent: *\nDisallow: /tmp # scratch\n");
        assert!(!robots.is_allowed("AnyBot", "/tmp/file"));
        assert!(robots.is_allowed("AnyBot", "/docs"));
    }

    #[test]
    fn disallow_all() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /\n");
        assert!(!robots.is_allowed("AnyBot", "/"));
        assert!(!robots.is_allowed("AnyBot", "/any/path"));
    }
}
