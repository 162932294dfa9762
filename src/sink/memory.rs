use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    parse_cell_ref, Area, Color, Container, Permission, Role, TabularSink, Worksheet,
};
use crate::error::{SinkCause, SinkFailure};

#[derive(Debug, Clone, Default)]
struct Sheet {
    meta: Option<Worksheet>,
    values: BTreeMap<(usize, usize), String>,
    /// Cells without an entry are white.
    colors: BTreeMap<(usize, usize), Color>,
}

#[derive(Debug, Clone)]
struct Book {
    container: Container,
    permissions: Vec<Permission>,
    sheets: Vec<Sheet>,
}

#[derive(Debug, Default)]
struct State {
    books: Vec<Book>,
    calls: Vec<String>,
    next_id: i64,
}

/// Spreadsheet service kept in memory, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container that already exists, with one grant.
    pub fn with_container(self, name: &str, email: &str, role: Role) -> Self {
        {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("book-{}", state.next_id);
            state.books.push(Book {
                container: Container {
                    id,
                    name: name.to_string(),
                },
                permissions: vec![Permission {
                    id: "perm-0".to_string(),
                    email: Some(email.to_string()),
                    role,
                }],
                sheets: Vec::new(),
            });
        }
        self
    }

    /// Every call made so far, as `operation args` strings.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn permissions(&self, container: &str) -> Vec<Permission> {
        self.lock()
            .books
            .iter()
            .find(|b| b.container.name == container)
            .map(|b| b.permissions.clone())
            .unwrap_or_default()
    }

    pub fn worksheets(&self, container: &str) -> Vec<Worksheet> {
        self.lock()
            .books
            .iter()
            .find(|b| b.container.name == container)
            .map(|b| b.sheets.iter().filter_map(|s| s.meta.clone()).collect())
            .unwrap_or_default()
    }

    /// Visible values, trimmed to the smallest rectangle holding them.
    pub fn values(&self, container: &str, worksheet: &str) -> Vec<Vec<String>> {
        let Some(sheet) = self.sheet(container, worksheet) else {
            return Vec::new();
        };
        let rows = sheet.values.keys().map(|(r, _)| *r).max().unwrap_or(0);
        let cols = sheet.values.keys().map(|(_, c)| *c).max().unwrap_or(0);
        (1..=rows)
            .map(|r| {
                (1..=cols)
                    .map(|c| sheet.values.get(&(r, c)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    /// Cells whose background is not white, keyed by 1-based `(row, column)`.
    pub fn colored_cells(&self, container: &str, worksheet: &str) -> BTreeMap<(usize, usize), Color> {
        self.sheet(container, worksheet)
            .map(|s| {
                s.colors
                    .iter()
                    .filter(|(_, color)| **color != Color::WHITE)
                    .map(|(k, v)| (*k, *v))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sheet(&self, container: &str, worksheet: &str) -> Option<Sheet> {
        self.lock()
            .books
            .iter()
            .find(|b| b.container.name == container)?
            .sheets
            .iter()
            .find(|s| s.meta.as_ref().is_some_and(|m| m.title == worksheet))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_sheet<T>(
        &self,
        operation: &str,
        container: &Container,
        worksheet: &Worksheet,
        f: impl FnOnce(&mut Sheet) -> T,
    ) -> Result<T, SinkFailure> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("{operation} {}", worksheet.title));
        let sheet = state
            .books
            .iter_mut()
            .find(|b| b.container.id == container.id)
            .and_then(|b| {
                b.sheets
                    .iter_mut()
                    .find(|s| s.meta.as_ref().is_some_and(|m| m.id == worksheet.id))
            })
            .ok_or_else(|| not_found(operation, &worksheet.title))?;
        Ok(f(sheet))
    }

    fn with_book<T>(
        &self,
        operation: &str,
        container: &Container,
        f: impl FnOnce(&mut Book, &mut i64) -> T,
    ) -> Result<T, SinkFailure> {
        let mut state = self.lock();
        state.calls.push(format!("{operation} {}", container.name));
        let State { books, next_id, .. } = &mut *state;
        let book = books
            .iter_mut()
            .find(|b| b.container.id == container.id)
            .ok_or_else(|| not_found(operation, &container.name))?;
        Ok(f(book, next_id))
    }
}

fn not_found(operation: &str, what: &str) -> SinkFailure {
    SinkFailure::new(operation, SinkCause::NotFound(what.to_string()))
}

fn cell(operation: &str, reference: &str) -> Result<(usize, usize), SinkFailure> {
    parse_cell_ref(reference)
        .ok_or_else(|| super::malformed(operation, format!("bad cell reference '{reference}'")))
}

#[async_trait]
impl TabularSink for MemorySink {
    async fn find_container(&self, name: &str) -> Result<Option<Container>, SinkFailure> {
        let mut state = self.lock();
        state.calls.push(format!("find_container {name}"));
        Ok(state
            .books
            .iter()
            .find(|b| b.container.name == name)
            .map(|b| b.container.clone()))
    }

    async fn create_container(&self, name: &str) -> Result<Container, SinkFailure> {
        let mut state = self.lock();
        state.calls.push(format!("create_container {name}"));
        state.next_id += 1;
        let container = Container {
            id: format!("book-{}", state.next_id),
            name: name.to_string(),
        };
        state.books.push(Book {
            container: container.clone(),
            permissions: Vec::new(),
            sheets: Vec::new(),
        });
        Ok(container)
    }

    async fn list_permissions(&self, container: &Container) -> Result<Vec<Permission>, SinkFailure> {
        self.with_book("list_permissions", container, |book, _| book.permissions.clone())
    }

    async fn create_permission(
        &self,
        container: &Container,
        email: &str,
        role: Role,
    ) -> Result<(), SinkFailure> {
        self.with_book("create_permission", container, |book, next_id| {
            *next_id += 1;
            book.permissions.push(Permission {
                id: format!("perm-{next_id}"),
                email: Some(email.to_string()),
                role,
            });
        })
    }

    async fn update_permission_role(
        &self,
        container: &Container,
        permission_id: &str,
        role: Role,
    ) -> Result<(), SinkFailure> {
        self.with_book("update_permission_role", container, |book, _| {
            book.permissions
                .iter_mut()
                .find(|p| p.id == permission_id)
                .map(|p| p.role = role)
        })?
        .ok_or_else(|| not_found("update_permission_role", permission_id))
    }

    async fn list_worksheets(&self, container: &Container) -> Result<Vec<Worksheet>, SinkFailure> {
        self.with_book("list_worksheets", container, |book, _| {
            book.sheets.iter().filter_map(|s| s.meta.clone()).collect()
        })
    }

    async fn add_worksheet(
        &self,
        container: &Container,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Result<Worksheet, SinkFailure> {
        self.with_book("add_worksheet", container, |book, next_id| {
            *next_id += 1;
            let worksheet = Worksheet {
                id: *next_id,
                title: title.to_string(),
                rows,
                cols,
            };
            book.sheets.push(Sheet {
                meta: Some(worksheet.clone()),
                ..Default::default()
            });
            worksheet
        })
    }

    async fn resize_worksheet(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        rows: usize,
        cols: usize,
    ) -> Result<Worksheet, SinkFailure> {
        self.with_sheet("resize_worksheet", container, worksheet, |sheet| {
            let resized = Worksheet {
                rows,
                cols,
                ..worksheet.clone()
            };
            sheet.meta = Some(resized.clone());
            resized
        })
    }

    async fn clear_range(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        area: &Area,
    ) -> Result<(), SinkFailure> {
        let target = match area {
            Area::Whole => None,
            Area::Cell(reference) => Some(cell("clear_range", reference)?),
        };
        self.with_sheet("clear_range", container, worksheet, |sheet| match target {
            None => sheet.values.clear(),
            Some(pos) => {
                sheet.values.remove(&pos);
            }
        })
    }

    async fn write_values(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        values: &[Vec<String>],
    ) -> Result<(), SinkFailure> {
        self.with_sheet("write_values", container, worksheet, |sheet| {
            for (r, row) in values.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    sheet.values.insert((r + 1, c + 1), value.clone());
                }
            }
        })
    }

    async fn set_background(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        area: &Area,
        color: Color,
    ) -> Result<(), SinkFailure> {
        let target = match area {
            Area::Whole => None,
            Area::Cell(reference) => Some(cell("set_background", reference)?),
        };
        self.with_sheet("set_background", container, worksheet, |sheet| match target {
            None if color == Color::WHITE => sheet.colors.clear(),
            None => {
                let (rows, cols) = sheet.meta.as_ref().map_or((0, 0), |m| (m.rows, m.cols));
                for r in 1..=rows {
                    for c in 1..=cols {
                        sheet.colors.insert((r, c), color);
                    }
                }
            }
            Some(pos) => {
                sheet.colors.insert(pos, color);
            }
        })
    }
}
