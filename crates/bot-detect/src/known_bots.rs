/// Lowercase User-Agent substrings of crawlers, HTTP libraries and headless
/// browsers.
pub const BOT_SUBSTRINGS: &[&str] = &[
    "abonti",
    "ahrefsbot",
    "aiohttp",
    "archive.org_bot",
    "axios",
    "baiduspider",
    "bingbot",
    "bitlybot",
    "blexbot",
    "bytespider",
    "curl",
    "exabot",
    "farside/0.1.0",
    "feedfetcher",
    "go-http-client",
    "googlebot",
    "googleimageproxy",
    "gptbot",
    "headlesschrome",
    "httpclient",
    "httpx",
    "jakarta",
    "james bot",
    "java",
    "javafx",
    "jersey",
    "libwww-perl",
    "linkdexbot",
    "mj12bot",
    "msnbot",
    "netvibes",
    "node-fetch",
    "okhttp",
    "petalbot",
    "phantomjs",
    "pixray",
    "playwright",
    "puppeteer",
    "python",
    "python-requests",
    "ruby",
    "scrapy",
    "selenium",
    "semrushbot",
    "seznambot",
    "sogou",
    "spinn3r",
    "splash",
    "synhttpclient",
    "universalfeedparser",
    "unknown",
    "wget",
    "yahoo! slurp",
    "yacybot",
    "yandexbot",
    "yandexmobilebot",
    "zmeu",
];

/// Case-insensitive substring match against [`BOT_SUBSTRINGS`].
pub fn is_known_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    BOT_SUBSTRINGS.iter().any(|sub| ua.contains(sub))
}
