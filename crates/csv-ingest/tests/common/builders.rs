//! Builders for CSV upload files.

#![allow(dead_code)]

/// Builds CSV text row by row.
///
/// Empty cells are written as nothing between the commas, the way exported
/// spreadsheets leave them.
pub struct CsvBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvBuilder {
    /// A builder with the standard `name,email,phone,company` header.
    pub fn new() -> Self {
        Self::with_headers(&["name", "email", "phone", "company"])
    }

    pub fn with_headers(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn customer(self, name: &str, email: &str, phone: &str, company: &str) -> Self {
        self.row(&[name, email, phone, company])
    }

    /// Appends `count` distinct valid customers, emails `prefix{n}@example.com`.
    pub fn customers(mut self, prefix: &str, count: usize) -> Self {
        for n in 0..count {
            self = self.customer(
                &format!("Customer {}", n),
                &format!("{}{}@example.com", prefix, n),
                "",
                "Acme",
            );
        }
        self
    }

    pub fn build(&self) -> String {
        let mut out = self.headers.join(",");
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|c| quote(c)).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

impl Default for CsvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn quote(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
