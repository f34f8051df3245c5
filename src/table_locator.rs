use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::station::Direction;

static TABLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("static selector"));
static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("static selector"));
static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("static selector"));
static CAPTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("caption").expect("static selector"));
static TAB_CONTROL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a, button, input[type='button'], input[type='submit']")
        .expect("static selector")
});

/// One HTML table, cells still as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// Header cells. The first is the year/month label column.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("no element matches {selector}")]
    NotFound { selector: String },
    #[error("{count} elements match {selector}, expected exactly one")]
    Ambiguous { selector: String, count: usize },
    #[error("element {selector} contains no table")]
    NoTable { selector: String },
    #[error("tab identifier {tag:?} is not a usable selector: {reason}")]
    InvalidTag { tag: String, reason: String },
}

/// Attributes of the control that switches the report between its entry and exit tabs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabButton {
    pub href: String,
    pub onclick: String,
    pub class: String,
    pub id: String,
    pub data_target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabButtons {
    pub entry: Option<TabButton>,
    pub exit: Option<TabButton>,
}

impl TabButtons {
    pub fn get(&self, direction: Direction) -> Option<&TabButton> {
        match direction {
            Direction::Entry => self.entry.as_ref(),
            Direction::Exit => self.exit.as_ref(),
        }
    }
}

pub fn find_tab_buttons(markup: &str) -> TabButtons {
    let document = Html::parse_document(markup);
    let mut buttons = TabButtons::default();
    for element in document.select(&TAB_CONTROL_SELECTOR) {
        let text = collapsed_text(element);
        let attr = |name: &str| element.value().attr(name).unwrap_or("").to_string();
        let button = TabButton {
            href: attr("href"),
            onclick: attr("onclick"),
            class: attr("class"),
            id: attr("id"),
            data_target: attr("data-target"),
        };
        if text.contains(Direction::Entry.label()) {
            buttons.entry = Some(button);
        } else if text.contains(Direction::Exit.label()) {
            buttons.exit = Some(button);
        }
    }
    buttons
}

/// Finds the single `div<tag>` container and parses the table inside it.
pub fn locate(markup: &str, tag: &str) -> Result<RawTable, LocateError> {
    let selector_text = format!("div{tag}");
    let selector = Selector::parse(&selector_text).map_err(|e| LocateError::InvalidTag {
        tag: tag.to_string(),
        reason: e.to_string(),
    })?;

    let document = Html::parse_document(markup);
    let containers: Vec<_> = document.select(&selector).collect();
    let container = match containers.as_slice() {
        [] => {
            return Err(LocateError::NotFound {
                selector: selector_text,
            });
        }
        [container] => *container,
        many => {
            return Err(LocateError::Ambiguous {
                selector: selector_text,
                count: many.len(),
            });
        }
    };

    let tables: Vec<_> = container.select(&TABLE_SELECTOR).collect();
    match tables.as_slice() {
        [] => Err(LocateError::NoTable {
            selector: selector_text,
        }),
        [table] => Ok(parse_table(*table)),
        many => Err(LocateError::Ambiguous {
            selector: format!("{selector_text} table"),
            count: many.len(),
        }),
    }
}

fn parse_table(table: ElementRef) -> RawTable {
    let mut rows = table.select(&ROW_SELECTOR).map(|row| {
        row.select(&CELL_SELECTOR)
            .map(collapsed_text)
            .collect::<Vec<_>>()
    });
    let columns = rows.next().unwrap_or_default();
    RawTable {
        columns,
        rows: rows.collect(),
    }
}

fn collapsed_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Summary of one table on the page, logged when the expected table can't be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub index: usize,
    pub id: Option<String>,
    pub class: Option<String>,
    pub parent_id: Option<String>,
    pub parent_class: Option<String>,
    pub caption: Option<String>,
    pub first_row: String,
}

pub fn describe_tables(markup: &str) -> Vec<TableSummary> {
    let document = Html::parse_document(markup);
    document
        .select(&TABLE_SELECTOR)
        .enumerate()
        .map(|(index, table)| {
            let parent = table.parent().and_then(ElementRef::wrap);
            let attr = |element: Option<ElementRef>, name: &str| {
                element.and_then(|e| e.value().attr(name)).map(str::to_string)
            };
            TableSummary {
                index,
                id: attr(Some(table), "id"),
                class: attr(Some(table), "class"),
                parent_id: attr(parent, "id"),
                parent_class: attr(parent, "class"),
                caption: table.select(&CAPTION_SELECTOR).next().map(collapsed_text),
                first_row: table
                    .select(&ROW_SELECTOR)
                    .next()
                    .map(|row| {
                        row.select(&CELL_SELECTOR)
                            .map(collapsed_text)
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html><body>
          <ul class="tabs">
            <li><a href="#tab1" class="tab-link">各站進站旅客人數</a></li>
            <li><a href="#tab2" class="tab-link" data-target="exit">各站出站旅客人數</a></li>
          </ul>
          <div id="tab1">
            <table class="data">
              <thead><tr><th>年度 / 月份</th><th>南港</th><th>台北</th></tr></thead>
              <tbody>
                <tr><td>2024-01</td><td>1,200</td><td> 3400 </td></tr>
                <tr><td></td><td></td><td></td></tr>
              </tbody>
            </table>
          </div>
          <div id="tab2"><p>nothing here</p></div>
        </body></html>
    "##;

    #[test]
    fn locates_single_container() {
        let table = locate(PAGE, "#tab1").unwrap();
        assert_eq!(table.columns, vec!["年度 / 月份", "南港", "台北"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["2024-01", "1,200", "3400"]);
        assert_eq!(table.shape(), (2, 3));
    }

    #[test]
    fn missing_container_is_not_found() {
        let err = locate(PAGE, "#tab9").unwrap_err();
        assert!(matches!(err, LocateError::NotFound { .. }), "{err:?}");
    }

    #[test]
    fn container_without_table() {
        let err = locate(PAGE, "#tab2").unwrap_err();
        assert!(matches!(err, LocateError::NoTable { .. }), "{err:?}");
    }

    #[test]
    fn duplicate_containers_are_ambiguous() {
        let markup = r#"
            <div class="pane"><table><tr><th>a</th></tr></table></div>
            <div class="pane"><table><tr><th>b</th></tr></table></div>
        "#;
        let err = locate(markup, ".pane").unwrap_err();
        assert!(
            matches!(err, LocateError::Ambiguous { count: 2, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn unusable_tag_is_rejected() {
        let err = locate(PAGE, "https://example.com/x?y").unwrap_err();
        assert!(matches!(err, LocateError::InvalidTag { .. }), "{err:?}");
    }

    #[test]
    fn finds_both_tab_buttons() {
        let buttons = find_tab_buttons(PAGE);
        let entry = buttons.get(Direction::Entry).unwrap();
        assert_eq!(entry.href, "#tab1");
        assert_eq!(entry.class, "tab-link");
        let exit = buttons.get(Direction::Exit).unwrap();
        assert_eq!(exit.href, "#tab2");
        assert_eq!(exit.data_target, "exit");
    }

    #[test]
    fn describes_every_table() {
        let summaries = describe_tables(PAGE);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].class.as_deref(), Some("data"));
        assert_eq!(summaries[0].parent_id.as_deref(), Some("tab1"));
        assert_eq!(summaries[0].first_row, "年度 / 月份 南港 台北");
    }
}
