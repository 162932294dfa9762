//! Google Sheets v4 and Drive v3 over plain HTTP.
//!
//! Authenticates as a service account: a JWT signed with the account's
//! private key is exchanged once for a bearer token, which is used for every
//! call of the run. Use [`GoogleSheets::connect`] for production and
//! [`GoogleSheets::with_token`] to point at a mock server in tests.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::{
    malformed, parse_cell_ref, Area, Color, Container, Permission, Role, TabularSink, Worksheet,
};
use crate::error::{SinkCause, SinkFailure};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/";
const DRIVE_BASE_URL: &str = "https://www.googleapis.com/";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// The fields of a service-account key file we use.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, SinkFailure> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SinkFailure::new(
                "read credentials",
                SinkCause::Auth(format!("{}: {e}", path.display())),
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SinkFailure::new(
                "read credentials",
                SinkCause::Auth(format!("{} is not a service account key: {e}", path.display())),
            )
        })
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Spreadsheet client authenticated with a bearer token.
pub struct GoogleSheets {
    client: Client,
    token: String,
    sheets_url: Url,
    drive_url: Url,
}

impl GoogleSheets {
    /// Authenticate against the production endpoints.
    pub async fn connect(key: &ServiceAccountKey) -> Result<Self, SinkFailure> {
        Self::connect_with_base_urls(key, SHEETS_BASE_URL, DRIVE_BASE_URL).await
    }

    pub async fn connect_with_base_urls(
        key: &ServiceAccountKey,
        sheets_base: &str,
        drive_base: &str,
    ) -> Result<Self, SinkFailure> {
        let client = build_client()?;
        let token = fetch_token(&client, key).await?;
        Self::from_parts(client, token, sheets_base, drive_base)
    }

    /// Skip authentication and use `token` directly.
    pub fn with_token(token: &str, sheets_base: &str, drive_base: &str) -> Result<Self, SinkFailure> {
        Self::from_parts(build_client()?, token.to_string(), sheets_base, drive_base)
    }

    fn from_parts(
        client: Client,
        token: String,
        sheets_base: &str,
        drive_base: &str,
    ) -> Result<Self, SinkFailure> {
        Ok(Self {
            client,
            token,
            sheets_url: base_url(sheets_base)?,
            drive_url: base_url(drive_base)?,
        })
    }

    fn sheets(&self, segments: &[&str]) -> Url {
        join(&self.sheets_url, &["v4", "spreadsheets"], segments)
    }

    fn drive(&self, segments: &[&str]) -> Url {
        join(&self.drive_url, &["drive", "v3", "files"], segments)
    }

    /// Send an authenticated request and return the JSON body.
    async fn call(&self, operation: &str, request: RequestBuilder) -> Result<Value, SinkFailure> {
        tracing::debug!("Sheets API call: {}", operation);
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SinkFailure::new(operation, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SinkFailure::new(operation, e))?;
        if !status.is_success() {
            return Err(SinkFailure::new(
                operation,
                SinkCause::Api {
                    status: status.as_u16(),
                    body,
                },
            ));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| malformed(operation, e.to_string()))
    }

    async fn batch_update(
        &self,
        operation: &str,
        container: &Container,
        request: Value,
    ) -> Result<Value, SinkFailure> {
        let url = self.sheets(&[format!("{}:batchUpdate", container.id).as_str()]);
        self.call(
            operation,
            self.client
                .post(url)
                .json(&json!({ "requests": [request] })),
        )
        .await
    }
}

fn build_client() -> Result<Client, SinkFailure> {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("backup-reporter/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SinkFailure::new("build client", e))
}

fn base_url(raw: &str) -> Result<Url, SinkFailure> {
    let normalised = format!("{}/", raw.trim_end_matches('/'));
    Url::parse(&normalised).map_err(|e| malformed("configure", format!("invalid base URL '{raw}': {e}")))
}

fn join(base: &Url, prefix: &[&str], segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(prefix).extend(segments);
    }
    url
}

async fn fetch_token(client: &Client, key: &ServiceAccountKey) -> Result<String, SinkFailure> {
    let auth_err = |message: String| SinkFailure::new("authenticate", SinkCause::Auth(message));

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: SCOPES,
        aud: &key.token_uri,
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| auth_err(format!("invalid private key: {e}")))?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| auth_err(format!("cannot sign assertion: {e}")))?;

    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await
        .map_err(|e| SinkFailure::new("authenticate", e))?;

    if !response.status().is_success() {
        return Err(auth_err(format!(
            "token exchange failed with status {}",
            response.status()
        )));
    }
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| auth_err(format!("token parse error: {e}")))?;
    Ok(token.access_token)
}

/// Sheet title as it must appear in an A1 range. Always quoted, so a
/// title that reads like a cell (`Q1`) still names the sheet.
fn quoted_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn a1_range(worksheet: &Worksheet, area: &Area) -> String {
    match area {
        Area::Whole => quoted_title(&worksheet.title),
        Area::Cell(cell) => format!("{}!{}", quoted_title(&worksheet.title), cell),
    }
}

/// Turn an [`Area`] into the `GridRange` batch requests address cells with.
fn grid_range(operation: &str, worksheet: &Worksheet, area: &Area) -> Result<Value, SinkFailure> {
    match area {
        Area::Whole => Ok(json!({ "sheetId": worksheet.id })),
        Area::Cell(reference) => {
            let (row, column) = parse_cell_ref(reference)
                .ok_or_else(|| malformed(operation, format!("bad cell reference '{reference}'")))?;
            Ok(json!({
                "sheetId": worksheet.id,
                "startRowIndex": row - 1,
                "endRowIndex": row,
                "startColumnIndex": column - 1,
                "endColumnIndex": column,
            }))
        }
    }
}

/// Drive query string literal.
fn drive_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn str_field<'a>(operation: &str, value: &'a Value, field: &str) -> Result<&'a str, SinkFailure> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(operation, format!("missing '{field}'")))
}

fn worksheet_from(operation: &str, properties: &Value) -> Result<Worksheet, SinkFailure> {
    let id = properties
        .get("sheetId")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let grid = &properties["gridProperties"];
    Ok(Worksheet {
        id,
        title: str_field(operation, properties, "title")?.to_string(),
        rows: grid["rowCount"].as_u64().unwrap_or(0) as usize,
        cols: grid["columnCount"].as_u64().unwrap_or(0) as usize,
    })
}

fn transfer_query(role: &Role) -> &'static [(&'static str, &'static str)] {
    if *role == Role::Owner {
        &[("transferOwnership", "true")]
    } else {
        &[]
    }
}

#[async_trait]
impl TabularSink for GoogleSheets {
    async fn find_container(&self, name: &str) -> Result<Option<Container>, SinkFailure> {
        let query = format!(
            "name = {} and mimeType = '{}' and trashed = false",
            drive_literal(name),
            SPREADSHEET_MIME
        );
        let body = self
            .call(
                "find spreadsheet",
                self.client
                    .get(self.drive(&[]))
                    .query(&[("q", query.as_str()), ("fields", "files(id,name)")]),
            )
            .await?;

        let Some(first) = body["files"].as_array().and_then(|files| files.first()) else {
            return Ok(None);
        };
        Ok(Some(Container {
            id: str_field("find spreadsheet", first, "id")?.to_string(),
            name: name.to_string(),
        }))
    }

    async fn create_container(&self, name: &str) -> Result<Container, SinkFailure> {
        let body = self
            .call(
                "create spreadsheet",
                self.client
                    .post(self.sheets(&[]))
                    .json(&json!({ "properties": { "title": name } })),
            )
            .await?;
        Ok(Container {
            id: str_field("create spreadsheet", &body, "spreadsheetId")?.to_string(),
            name: name.to_string(),
        })
    }

    async fn list_permissions(&self, container: &Container) -> Result<Vec<Permission>, SinkFailure> {
        let body = self
            .call(
                "list permissions",
                self.client
                    .get(self.drive(&[container.id.as_str(), "permissions"]))
                    .query(&[("fields", "permissions(id,emailAddress,role)")]),
            )
            .await?;

        body["permissions"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|p| {
                Ok(Permission {
                    id: str_field("list permissions", p, "id")?.to_string(),
                    email: p["emailAddress"].as_str().map(str::to_string),
                    role: Role::parse(str_field("list permissions", p, "role")?),
                })
            })
            .collect()
    }

    async fn create_permission(
        &self,
        container: &Container,
        email: &str,
        role: Role,
    ) -> Result<(), SinkFailure> {
        self.call(
            "share spreadsheet",
            self.client
                .post(self.drive(&[container.id.as_str(), "permissions"]))
                .query(transfer_query(&role))
                .json(&json!({
                    "type": "user",
                    "role": role.as_str(),
                    "emailAddress": email,
                })),
        )
        .await?;
        Ok(())
    }

    async fn update_permission_role(
        &self,
        container: &Container,
        permission_id: &str,
        role: Role,
    ) -> Result<(), SinkFailure> {
        self.call(
            "update permission",
            self.client
                .request(
                    Method::PATCH,
                    self.drive(&[container.id.as_str(), "permissions", permission_id]),
                )
                .query(transfer_query(&role))
                .json(&json!({ "role": role.as_str() })),
        )
        .await?;
        Ok(())
    }

    async fn list_worksheets(&self, container: &Container) -> Result<Vec<Worksheet>, SinkFailure> {
        let body = self
            .call(
                "list worksheets",
                self.client
                    .get(self.sheets(&[container.id.as_str()]))
                    .query(&[("fields", "sheets.properties")]),
            )
            .await?;

        body["sheets"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|s| worksheet_from("list worksheets", &s["properties"]))
            .collect()
    }

    async fn add_worksheet(
        &self,
        container: &Container,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Result<Worksheet, SinkFailure> {
        let body = self
            .batch_update(
                "add worksheet",
                container,
                json!({
                    "addSheet": {
                        "properties": {
                            "title": title,
                            "gridProperties": { "rowCount": rows, "columnCount": cols },
                        }
                    }
                }),
            )
            .await?;
        worksheet_from("add worksheet", &body["replies"][0]["addSheet"]["properties"])
    }

    async fn resize_worksheet(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        rows: usize,
        cols: usize,
    ) -> Result<Worksheet, SinkFailure> {
        self.batch_update(
            "resize worksheet",
            container,
            json!({
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": worksheet.id,
                        "gridProperties": { "rowCount": rows, "columnCount": cols },
                    },
                    "fields": "gridProperties(rowCount,columnCount)",
                }
            }),
        )
        .await?;
        Ok(Worksheet {
            rows,
            cols,
            ..worksheet.clone()
        })
    }

    async fn clear_range(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        area: &Area,
    ) -> Result<(), SinkFailure> {
        let range = format!("{}:clear", a1_range(worksheet, area));
        self.call(
            "clear values",
            self.client
                .post(self.sheets(&[container.id.as_str(), "values", range.as_str()]))
                .json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn write_values(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        values: &[Vec<String>],
    ) -> Result<(), SinkFailure> {
        let range = a1_range(worksheet, &Area::Cell("A1".to_string()));
        self.call(
            "write values",
            self.client
                .put(self.sheets(&[container.id.as_str(), "values", range.as_str()]))
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&json!({
                    "range": range,
                    "majorDimension": "ROWS",
                    "values": values,
                })),
        )
        .await?;
        Ok(())
    }

    async fn set_background(
        &self,
        container: &Container,
        worksheet: &Worksheet,
        area: &Area,
        color: Color,
    ) -> Result<(), SinkFailure> {
        let range = grid_range("set background", worksheet, area)?;
        self.batch_update(
            "set background",
            container,
            json!({
                "repeatCell": {
                    "range": range,
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": {
                                "red": color.red,
                                "green": color.green,
                                "blue": color.blue,
                            }
                        }
                    },
                    "fields": "userEnteredFormat.backgroundColor",
                }
            }),
        )
        .await?;
        Ok(())
    }
}
