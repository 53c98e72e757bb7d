//! ASCII table observer built on `tabled`.
//!
//! Stats render either as a `Name | Value` table or, in compact mode, as a
//! grid of `name: value` cells. Site counts render as `Site | Total | Unique`.
//!
//! ```rust
//! use hitcount::observers::table::{TableObserver, TableStyle};
//! use hitcount::stats::Stats;
//!
//! let stats = Stats::new();
//! stats.recorded.add(1000);
//!
//! let table = TableObserver::new()
//!     .with_style(TableStyle::Ascii)
//!     .render(stats.observables().into_iter());
//! assert!(table.contains("recorded_total"));
//! assert!(table.contains("1000"));
//! ```

use tabled::settings::object::Rows;
use tabled::settings::{Remove, Style};
use tabled::{builder::Builder, Table, Tabled};

use crate::counters::Observable;
use crate::snapshot::{CounterSnapshot, SiteSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Modern,
    Markdown,
    Dots,
    Blank,
}

/// Separator between name and value in compact mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompactSeparator {
    #[default]
    Colon,
    Equals,
    Arrow,
    Space,
}

impl CompactSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactSeparator::Colon => ": ",
            CompactSeparator::Equals => " = ",
            CompactSeparator::Arrow => " → ",
            CompactSeparator::Space => " ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableConfig {
    pub style: TableStyle,
    /// Header row, outside compact mode.
    pub show_header: bool,
    /// Line printed above the table.
    pub title: Option<String>,
    pub compact: bool,
    /// Cells per row in compact mode, at least 1.
    pub columns: usize,
    pub separator: CompactSeparator,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
            title: None,
            compact: false,
            columns: 1,
            separator: CompactSeparator::default(),
        }
    }
}

#[derive(Tabled)]
struct CounterRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: u64,
}

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "Site")]
    site: String,
    #[tabled(rename = "Total")]
    total: u64,
    #[tabled(rename = "Unique")]
    unique: u64,
}

/// Renders stats and site counts as ASCII tables.
#[derive(Debug, Clone, Default)]
pub struct TableObserver {
    config: TableConfig,
}

impl TableObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self { config }
    }

    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.config.style = style;
        self
    }

    pub fn with_header(mut self, show: bool) -> Self {
        self.config.show_header = show;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn compact(mut self, enabled: bool) -> Self {
        self.config.compact = enabled;
        self
    }

    pub fn columns(mut self, count: usize) -> Self {
        self.config.columns = count.max(1);
        self
    }

    pub fn separator(mut self, sep: CompactSeparator) -> Self {
        self.config.separator = sep;
        self
    }

    fn apply_style(&self, table: &mut Table) {
        match self.config.style {
            TableStyle::Ascii => table.with(Style::ascii()),
            TableStyle::Rounded => table.with(Style::rounded()),
            TableStyle::Sharp => table.with(Style::sharp()),
            TableStyle::Modern => table.with(Style::modern()),
            TableStyle::Markdown => table.with(Style::markdown()),
            TableStyle::Dots => table.with(Style::dots()),
            TableStyle::Blank => table.with(Style::blank()),
        };
    }

    fn finish(&self, mut table: Table, has_header: bool) -> String {
        self.apply_style(&mut table);
        if has_header && !self.config.show_header {
            table.with(Remove::row(Rows::first()));
        }
        match &self.config.title {
            Some(title) => format!("{title}\n{table}"),
            None => table.to_string(),
        }
    }

    /// Renders stats counters.
    pub fn render<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> String {
        let snapshots: Vec<CounterSnapshot> =
            counters.map(CounterSnapshot::from_observable).collect();
        if self.config.compact {
            self.render_compact(&snapshots)
        } else {
            let rows: Vec<CounterRow> = snapshots
                .into_iter()
                .map(|c| CounterRow {
                    name: c.name,
                    value: c.value,
                })
                .collect();
            self.finish(Table::new(&rows), true)
        }
    }

    fn render_compact(&self, snapshots: &[CounterSnapshot]) -> String {
        if snapshots.is_empty() {
            return String::new();
        }

        let cols = self.config.columns;
        let sep = self.config.separator.as_str();
        let cells: Vec<String> = snapshots
            .iter()
            .map(|c| format!("{}{sep}{}", c.name, c.value))
            .collect();

        let mut builder = Builder::default();
        for chunk in cells.chunks(cols) {
            let mut row = chunk.to_vec();
            row.resize(cols, String::new());
            builder.push_record(row);
        }
        self.finish(builder.build(), false)
    }

    /// Renders per-site live counts.
    pub fn render_sites(&self, sites: &[SiteSnapshot]) -> String {
        let rows: Vec<SiteRow> = sites
            .iter()
            .map(|s| SiteRow {
                site: s.site.to_string(),
                total: s.total,
                unique: s.unique,
            })
            .collect();
        self.finish(Table::new(&rows), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::monotone::Monotone;
    use crate::site::{Counts, SiteId};

    #[test]
    fn test_render_empty() {
        let counters: Vec<&dyn Observable> = vec![];
        let output = TableObserver::new().render(counters.into_iter());
        // header only
        assert!(output.contains("Name"));
    }

    #[test]
    fn test_render_empty_compact() {
        let counters: Vec<&dyn Observable> = vec![];
        let output = TableObserver::new()
            .compact(true)
            .columns(3)
            .render(counters.into_iter());
        assert!(output.is_empty());
    }

    #[test]
    fn test_render_counters() {
        let counter = Monotone::new().with_name("recorded_total");
        counter.add(42);

        let counters: Vec<&dyn Observable> = vec![&counter];
        let output = TableObserver::new().render(counters.into_iter());
        assert!(output.contains("recorded_total"));
        assert!(output.contains("42"));
    }

    #[test]
    fn test_render_without_header() {
        let counter = Monotone::new().with_name("recorded_total");
        let counters: Vec<&dyn Observable> = vec![&counter];
        let output = TableObserver::new()
            .with_header(false)
            .render(counters.into_iter());
        assert!(!output.contains("Name"));
        assert!(output.contains("recorded_total"));
    }

    #[test]
    fn test_render_compact_grid() {
        let a = Monotone::new().with_name("a");
        let b = Monotone::new().with_name("b");
        let c = Monotone::new().with_name("c");
        a.add(1);
        b.add(2);
        c.add(3);

        let counters: Vec<&dyn Observable> = vec![&a, &b, &c];
        let output = TableObserver::new()
            .compact(true)
            .columns(2)
            .separator(CompactSeparator::Equals)
            .with_style(TableStyle::Ascii)
            .render(counters.into_iter());
        assert!(output.contains("a = 1"));
        assert!(output.contains("b = 2"));
        assert!(output.contains("c = 3"));
        // two cells on the first line of data
        let first = output.lines().nth(1).unwrap();
        assert!(first.contains("a = 1") && first.contains("b = 2"));
    }

    #[test]
    fn test_render_with_title() {
        let counters: Vec<&dyn Observable> = vec![];
        let output = TableObserver::new()
            .with_title("Stats")
            .render(counters.into_iter());
        assert!(output.starts_with("Stats\n"));
    }

    #[test]
    fn test_render_sites() {
        let sites = vec![SiteSnapshot::new(SiteId::new("abc123").unwrap(), Counts::new(7, 4))];
        let output = TableObserver::new()
            .with_style(TableStyle::Markdown)
            .render_sites(&sites);
        assert!(output.contains("Site"));
        let row = output.lines().find(|l| l.contains("abc123")).unwrap();
        assert!(row.contains(" 7 ") && row.contains(" 4 "));
    }
}
