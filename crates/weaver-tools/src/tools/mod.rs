pub mod web_scraper;
pub mod web_search;
