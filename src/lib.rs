//! Artbooms RSS - republishes the artbooms.com archive as an RSS 2.0 feed.
//!
//! Article metadata is crawled in the background into a local JSON cache;
//! the feed is always rendered from whatever the cache currently holds.

pub mod archive;
pub mod article;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extractor;
pub mod feed;
pub mod fetcher;
pub mod routes;
