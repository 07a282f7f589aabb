//! Sample inputs for the codec benchmarks.
//!
//! Payloads are generated rather than stored so every size class shares one shape.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    Small,
    Large,
}

impl PayloadSize {
    pub fn field_count(self) -> usize {
        match self {
            PayloadSize::Small => 4,
            PayloadSize::Large => 256,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PayloadSize::Small => "small",
            PayloadSize::Large => "large",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Payload {
    size: PayloadSize,
    content: String,
}

impl Payload {
    pub fn size(&self) -> PayloadSize {
        self.size
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// `field0=value0&field1=value1&...`
    pub fn form_body(size: PayloadSize) -> Self {
        let content =
            (0..size.field_count()).map(|i| format!("field{i}=value%20{i}")).collect::<Vec<_>>().join("&");
        Self { size, content }
    }

    /// A full `multipart/form-data` request with one plain field per count and one file.
    pub fn multipart_request(size: PayloadSize) -> Self {
        let mut body = String::new();
        for i in 0..size.field_count() {
            body.push_str(&format!(
                "--bench\r\nContent-Disposition: form-data; name=\"field{i}\"\r\n\r\nvalue {i}\r\n"
            ));
        }
        body.push_str("--bench\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"data.bin\"\r\n\r\n");
        body.push_str(&"x".repeat(size.field_count() * 64));
        body.push_str("\r\n--bench--\r\n");

        let content = format!(
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=bench\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        Self { size, content }
    }

    /// A `GET` request carrying one cookie per count.
    pub fn cookie_request(size: PayloadSize) -> Self {
        let cookies = (0..size.field_count()).map(|i| format!("cookie{i}=value{i}")).collect::<Vec<_>>().join("; ");
        let content = format!("GET /profile?tab=settings HTTP/1.1\r\nHost: localhost\r\nCookie: {cookies}\r\n\r\n");
        Self { size, content }
    }
}
