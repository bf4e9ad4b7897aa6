/// Database row types. These map directly to SQLite rows.
/// Distinct from ampchat-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: u64,
    pub fullname: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Default)]
pub struct NewUser<'a> {
    pub fullname: Option<&'a str>,
    pub firstname: Option<&'a str>,
    pub lastname: Option<&'a str>,
    pub image_url: Option<&'a str>,
}

pub struct MessageRow {
    pub id: u64,
    pub chat_id: u64,
    pub user_id: u64,
    pub message: String,
    pub created_at: String,
}

pub struct EmailTrackingRow {
    pub id: u64,
    pub tracking_id: String,
    pub user_id: Option<u64>,
    pub email_type: String,
    pub recipient_email: String,
    pub replied_at: Option<String>,
    pub replied_via: Option<String>,
}

/// Click row appended when an email interaction happens outside a browser.
pub struct EmailClick<'a> {
    pub link_url: &'a str,
    pub link_position: &'a str,
    pub action: &'a str,
}
