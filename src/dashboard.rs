use std::sync::Arc;

use crate::{
    config::DashboardConfig,
    feed::{ConnectionState, Phase},
    schema::{Item, Snapshot, StockCategory},
};

// ------------------------------------------------------------
// Console dashboard
// ------------------------------------------------------------
//
// Presentation consumer of the feed. Turns each snapshot into a
// handful of log lines.
//
// IMPORTANT:
// - All filtering (search, categories, availability) happens
//   here. The feed client always publishes the full snapshot.
// - Rendering is pure (`render_lines`); only `show_*` writes
//   to the log.
//
#[derive(Debug, Clone)]
pub struct Dashboard {
    search: Option<String>,
    categories: Vec<StockCategory>,
    show_unavailable: bool,
}

impl Dashboard {
    pub fn new(cfg: DashboardConfig) -> Self {
        let search = cfg
            .search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let categories = if cfg.categories.is_empty() {
            StockCategory::ALL.to_vec()
        } else {
            cfg.categories
        };

        Self {
            search,
            categories,
            show_unavailable: cfg.show_unavailable,
        }
    }

    fn visible(&self, item: &Item) -> bool {
        if !self.show_unavailable && item.quantity == 0 {
            return false;
        }
        match &self.search {
            Some(needle) => item.name.to_lowercase().contains(needle),
            None => true,
        }
    }

    /// Lines describing one snapshot: a header, one line per shown
    /// category, and the active weather.
    pub fn render_lines(&self, snapshot: &Snapshot) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.categories.len() + 2);

        let (mut shown, mut in_stock) = (0usize, 0usize);
        let mut sections = Vec::with_capacity(self.categories.len());

        for category in &self.categories {
            let items: Vec<&Item> = snapshot
                .items(*category)
                .iter()
                .filter(|i| self.visible(i))
                .collect();

            shown += items.len();
            in_stock += items.iter().filter(|i| i.quantity > 0).count();

            let body = if items.is_empty() {
                "none available".to_string()
            } else {
                items
                    .iter()
                    .map(|i| format!("{} x{}", i.name, i.quantity))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            sections.push(format!("  {:<10} {}", category.label(), body));
        }

        lines.push(format!(
            "Stock {} at {} ({} shown, {} in stock)",
            snapshot.sequence_id,
            snapshot.captured_at.format("%H:%M:%S"),
            shown,
            in_stock
        ));
        lines.extend(sections);

        let weather: Vec<&str> = snapshot
            .weather
            .iter()
            .filter(|w| w.active)
            .map(|w| w.name.as_str())
            .collect();
        lines.push(if weather.is_empty() {
            "  Weather    no active weather conditions".to_string()
        } else {
            format!("  Weather    {}", weather.join(", "))
        });

        lines
    }

    pub fn show_snapshot(&self, snapshot: &Arc<Snapshot>) {
        for line in self.render_lines(snapshot) {
            log::info!("{line}");
        }
    }

    pub fn show_connection(&self, state: &ConnectionState) {
        let line = connection_line(state);
        match (&state.phase, &state.last_error) {
            (Phase::Disconnected, Some(_)) => log::warn!("{line}"),
            _ => log::info!("{line}"),
        }
    }
}

/// One-line connection status, including the last error when present.
pub fn connection_line(state: &ConnectionState) -> String {
    let mut line = format!("Feed {}", state.phase);

    if state.consecutive_failures > 0 {
        line.push_str(&format!(" (failed attempts: {})", state.consecutive_failures));
    }
    if let Some(at) = state.next_refresh_at {
        line.push_str(&format!(", next refresh {}", at.format("%H:%M:%S")));
    }
    if let Some(err) = &state.last_error {
        line.push_str(&format!(": {err}"));
    }

    line
}
