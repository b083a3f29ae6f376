/// Randomised browser-like request headers
use rand::seq::SliceRandom;

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
];

const DEFAULT_ACCEPT_LANGUAGES: &[&str] = &[
    "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7",
    "zh-Hant-TW,zh-Hant;q=0.9,en;q=0.8",
    "en-US,en;q=0.9,zh-TW;q=0.8",
];

/// User-Agent / Accept-Language pool, owned by a source rather than global
#[derive(Debug, Clone)]
pub struct HeaderPool {
    user_agents: Vec<String>,
    accept_languages: Vec<String>,
}

impl Default for HeaderPool {
    fn default() -> Self {
        HeaderPool {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            accept_languages: DEFAULT_ACCEPT_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HeaderPool {
    /// Custom agent list; falls back to the defaults when empty
    pub fn with_user_agents(user_agents: Vec<String>) -> Self {
        let mut pool = HeaderPool::default();
        if !user_agents.is_empty() {
            pool.user_agents = user_agents;
        }
        pool
    }

    pub fn user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }

    pub fn accept_language(&self) -> &str {
        self.accept_languages
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_ACCEPT_LANGUAGES[0])
    }

    pub fn len(&self) -> usize {
        self.user_agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_agents.is_empty()
    }
}
