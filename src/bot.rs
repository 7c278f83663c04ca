//! User-agent based bot filtering.

/// Lowercase substrings identifying crawlers, link-preview fetchers and uptime
/// monitors. The generic entries (`bot`, `spider`, ...) already cover most of
/// the named ones; the names stay listed so the coverage is explicit.
const BOT_PATTERNS: &[&str] = &[
    "bot",
    "spider",
    "crawler",
    "scraper",
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "facebookexternalhit",
    "twitterbot",
    "linkedinbot",
    "pinterest",
    "whatsapp",
    "telegram",
    "discordbot",
    "uptimerobot",
    "pingdom",
    "newrelicpinger",
];

/// Whether `user_agent` belongs to an automated client.
///
/// A missing or empty user agent is not treated as a bot.
pub fn is_bot(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) else {
        return false;
    };
    let ua = ua.to_ascii_lowercase();
    BOT_PATTERNS.iter().any(|pattern| ua.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_crawlers_are_bots() {
        let agents = [
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
            "Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)",
            "Mozilla/5.0 (compatible; Yahoo! Slurp; http://help.yahoo.com/help/us/ysearch/slurp)",
            "facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)",
            "WhatsApp/2.23.20.0",
            "TelegramBot (like TwitterBot)",
            "Mozilla/5.0 (compatible; UptimeRobot/2.0; http://www.uptimerobot.com/)",
            "Pingdom.com_bot_version_1.4_(http://www.pingdom.com/)",
            "NewRelicPinger/1.0 (12345)",
            "Pinterest/0.2 (+https://www.pinterest.com/bot.html)",
            "SomeScraper/1.0",
            "WEB-CRAWLER",
        ];

        for ua in agents {
            assert!(is_bot(Some(ua)), "expected bot: {ua}");
        }
    }

    #[test]
    fn test_browsers_are_not_bots() {
        let agents = [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
            "github-camo (876de43e)",
        ];

        for ua in agents {
            assert!(!is_bot(Some(ua)), "expected human: {ua}");
        }
    }

    #[test]
    fn test_missing_user_agent_is_not_a_bot() {
        assert!(!is_bot(None));
        assert!(!is_bot(Some("")));
    }
}
