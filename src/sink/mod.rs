//! Publishing a [`ReportGrid`] to a shared spreadsheet.

use async_trait::async_trait;
use std::time::Duration;

use crate::classify::HealthStatus;
use crate::error::{SinkCause, SinkFailure};
use crate::report::ReportGrid;

mod memory;
mod sheets;

pub use memory::MemorySink;
pub use sheets::{GoogleSheets, ServiceAccountKey};

/// Smallest worksheet created, whatever the grid size.
pub const MIN_ROWS: usize = 100;
pub const MIN_COLS: usize = 20;

/// A spreadsheet document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
}

/// A tab inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub id: i64,
    pub title: String,
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Owner,
    Writer,
    Reader,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Owner => "owner",
            Role::Writer => "writer",
            Role::Reader => "reader",
            Role::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "owner" => Role::Owner,
            "writer" => Role::Writer,
            "reader" => Role::Reader,
            other => Role::Other(other.to_string()),
        }
    }
}

/// One access grant on a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: String,
    pub email: Option<String>,
    pub role: Role,
}

/// Cells a formatting or clearing call applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Area {
    Whole,
    /// A single cell in A1 notation, e.g. `B3`.
    Cell(String),
}

/// Background color, channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Color {
    pub const WHITE: Color = Color { red: 1.0, green: 1.0, blue: 1.0 };
    pub const AMBER: Color = Color { red: 1.0, green: 0.75, blue: 0.0 };
    pub const RED: Color = Color { red: 1.0, green: 0.0, blue: 0.0 };
}

impl From<HealthStatus> for Color {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Neutral => Color::WHITE,
            HealthStatus::Warning => Color::AMBER,
            HealthStatus::Alarm => Color::RED,
        }
    }
}

/// The operations the reconciler needs from a spreadsheet service.
#[async_trait]
pub trait TabularSink: Send + Sync {
    async fn find_container(&self, name: &str) -> Result<Option<Container>, SinkFailure>;

    async fn create_container(&self, name: &str) -> Result<Container, SinkFailure>;

    async fn list_permissions(&self, container: &Container) -> Result<Vec<Permission>, SinkFailure>;

    async fn create_permission(
        &self,
        container: &Container,
        email: &str,
        role: Role,
    ) -> Result<(), SinkFailure>;

    async fn update_permission_role(
        &self,
        container: &Container,
        permission_id: &str,
        role: Role,
    ) -> Result<(), SinkFailure>;

    async fn list_worksheets(&self, container: &Container) -> Result<Vec<Worksheet>, SinkFailure>;

    async fn add_worksheet(
        &self,
        container: &Container,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Result<Worksheet, SinkFailure>;

    async fn resize_worksheet(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        rows: usize,
        cols: usize,
    ) -> Result<Worksheet, SinkFailure>;

    async fn clear_range(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        area: &Area,
    ) -> Result<(), SinkFailure>;

    /// Write `values` starting at A1, interpreting them as if typed by a user.
    async fn write_values(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        values: &[Vec<String>],
    ) -> Result<(), SinkFailure>;

    async fn set_background(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        area: &Area,
        color: Color,
    ) -> Result<(), SinkFailure>;
}

/// Spreadsheet column name of a 1-based column index: 1 is `A`, 27 is `AA`.
pub fn column_letter(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// 1-based column index of a column name; `None` for anything but ASCII letters.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.bytes().try_fold(0usize, |acc, b| {
        let digit = match b {
            b'A'..=b'Z' => b - b'A' + 1,
            b'a'..=b'z' => b - b'a' + 1,
            _ => return None,
        };
        acc.checked_mul(26)?.checked_add(digit as usize)
    })
}

/// A1 reference of a 1-based `(row, column)`.
pub fn cell_ref(row: usize, column: usize) -> String {
    format!("{}{}", column_letter(column), row)
}

/// Split an A1 reference into 1-based `(row, column)`.
pub fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    let column = column_index(letters)?;
    let row: usize = digits.parse().ok()?;
    (row > 0).then_some((row, column))
}

/// Where and as whom the report is published.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub container_name: String,
    pub worksheet_name: String,
    /// Email that must hold owner rights on the container.
    pub owner: Option<String>,
    /// Pause after coloring each row, to stay under the API quota.
    pub row_delay: Duration,
}

/// Makes the sink show exactly one grid.
///
/// The sequence is not transactional: a failure part way leaves the sheet
/// in whatever state the last successful call produced.
pub struct Reconciler<S> {
    sink: S,
    settings: SinkSettings,
}

impl<S: TabularSink> Reconciler<S> {
    pub fn new(sink: S, settings: SinkSettings) -> Self {
        Self { sink, settings }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn reconcile(&self, grid: &ReportGrid) -> Result<(), SinkFailure> {
        let container = self.ensure_container().await?;
        let worksheet = self.ensure_worksheet(&container, grid).await?;

        tracing::info!("Writing {} rows to '{}'", grid.height(), worksheet.title);
        self.sink
            .clear_range(&container, &worksheet, &Area::Whole)
            .await?;
        self.sink
            .write_values(&container, &worksheet, grid.values())
            .await?;

        self.paint(&container, &worksheet, grid).await?;
        tracing::info!("Report published to '{}'", container.name);
        Ok(())
    }

    async fn ensure_container(&self) -> Result<Container, SinkFailure> {
        let name = &self.settings.container_name;
        match self.sink.find_container(name).await? {
            Some(container) => {
                self.ensure_owner(&container).await?;
                Ok(container)
            }
            None => {
                tracing::info!("Spreadsheet '{}' not found, creating it", name);
                let container = self.sink.create_container(name).await?;
                if let Some(owner) = &self.settings.owner {
                    self.sink
                        .create_permission(&container, owner, Role::Owner)
                        .await?;
                }
                Ok(container)
            }
        }
    }

    async fn ensure_owner(&self, container: &Container) -> Result<(), SinkFailure> {
        let Some(owner) = &self.settings.owner else {
            return Ok(());
        };
        let permissions = self.sink.list_permissions(container).await?;
        let grant = permissions.iter().find(|p| {
            p.email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(owner))
        });

        match grant {
            Some(p) if p.role != Role::Owner => {
                tracing::info!("Promoting {} to owner of '{}'", owner, container.name);
                self.sink
                    .update_permission_role(container, &p.id, Role::Owner)
                    .await
            }
            Some(_) => Ok(()),
            None => {
                tracing::warn!(
                    "{} has no access to '{}'; leaving permissions as they are",
                    owner,
                    container.name
                );
                Ok(())
            }
        }
    }

    async fn ensure_worksheet(
        &self,
        container: &Container,
        grid: &ReportGrid,
    ) -> Result<Worksheet, SinkFailure> {
        let title = &self.settings.worksheet_name;
        let rows = grid.height().max(MIN_ROWS);
        let cols = grid.width().max(MIN_COLS);

        let existing = self
            .sink
            .list_worksheets(container)
            .await?
            .into_iter()
            .find(|w| &w.title == title);

        match existing {
            Some(sheet) if sheet.rows < grid.height() || sheet.cols < grid.width() => {
                self.sink
                    .resize_worksheet(
                        container,
                        &sheet,
                        sheet.rows.max(grid.height()),
                        sheet.cols.max(grid.width()),
                    )
                    .await
            }
            Some(sheet) => Ok(sheet),
            None => {
                tracing::info!("Adding worksheet '{}'", title);
                self.sink.add_worksheet(container, title, rows, cols).await
            }
        }
    }

    async fn paint(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        grid: &ReportGrid,
    ) -> Result<(), SinkFailure> {
        self.sink
            .set_background(container, worksheet, &Area::Whole, Color::WHITE)
            .await?;

        for (r, row) in grid.colors().iter().enumerate() {
            for (c, status) in row.iter().enumerate() {
                let area = Area::Cell(cell_ref(r + 1, c + 1));
                self.sink
                    .set_background(container, worksheet, &area, (*status).into())
                    .await?;
            }
            tokio::time::sleep(self.settings.row_delay).await;
        }
        Ok(())
    }
}

fn malformed(operation: &str, message: impl Into<String>) -> SinkFailure {
    SinkFailure::new(operation, SinkCause::Malformed(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(53), "BA");
        assert_eq!(column_letter(702), "ZZ");
        assert_eq!(column_letter(703), "AAA");
    }

    #[test]
    fn test_column_index_inverts_letters() {
        for n in [1, 2, 26, 27, 52, 53, 702, 703, 16384] {
            assert_eq!(column_index(&column_letter(n)), Some(n));
        }
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_cell_refs() {
        assert_eq!(cell_ref(3, 2), "B3");
        assert_eq!(parse_cell_ref("B3"), Some((3, 2)));
        assert_eq!(parse_cell_ref("AA10"), Some((10, 27)));
        assert_eq!(parse_cell_ref("B0"), None);
        assert_eq!(parse_cell_ref("3B"), None);
        assert_eq!(parse_cell_ref("B"), None);
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(Color::from(HealthStatus::Neutral), Color::WHITE);
        assert_eq!(Color::from(HealthStatus::Warning), Color::AMBER);
        assert_eq!(Color::from(HealthStatus::Alarm), Color::RED);
    }
}
