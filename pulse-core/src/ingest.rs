//! Server-side handling of inbound metric requests.
//!
//! These functions hold the request semantics so the HTTP layer only maps routes and
//! status codes: body decoding (gzip, signature, decryption), updates and lookups.

use crate::error::{PulseError, Result};
use crate::observability::metrics::record_update;
use crate::storage::Repository;
use crate::transport::compress::gunzip;
use crate::transport::encrypt::Decryptor;
use crate::transport::signing::verify;
use crate::types::{MetricKind, MetricName, MetricRecord, MetricValue, Metrics};
use std::fmt::Write as _;
use std::str::FromStr;
use tracing::debug;

/// Request headers relevant to body decoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct BodyHeaders<'a> {
    pub content_encoding: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Turn a raw request body into the JSON payload.
///
/// Gunzips when the body is gzip-encoded. With a `secret`, the signature header must be
/// present and match the decompressed body. With a `decryptor`, the body is decrypted
/// after the signature check.
pub fn decode_body(
    headers: BodyHeaders<'_>,
    raw: &[u8],
    secret: Option<&str>,
    decryptor: Option<&Decryptor>,
) -> Result<Vec<u8>> {
    let body = match headers.content_encoding {
        Some(encoding) if encoding.eq_ignore_ascii_case("gzip") => gunzip(raw)?,
        _ => raw.to_vec(),
    };

    if let Some(secret) = secret {
        let signature = headers.signature.ok_or_else(|| PulseError::SignatureInvalid {
            reason: "signature header is missing".to_string(),
        })?;
        if !verify(signature, &body, secret) {
            return Err(PulseError::SignatureInvalid {
                reason: "signature does not match body".to_string(),
            });
        }
    }

    match decryptor {
        Some(decryptor) => decryptor.decrypt(&body),
        None => Ok(body),
    }
}

/// Empty names are reported as unknown metrics, not as malformed input.
fn require_name(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(PulseError::MetricNotFound { name: String::new() });
    }
    Ok(())
}

fn parse_kind(raw: &str) -> Result<MetricKind> {
    MetricKind::from_str(raw)
}

/// Apply one DTO and return the stored result.
pub async fn apply_metric(repo: &dyn Repository, dto: &Metrics) -> Result<Metrics> {
    require_name(&dto.id)?;
    repo.upsert(dto).await?;
    record_update(dto.mtype);

    let name = dto.name();
    let stored = repo
        .get(&name)
        .await?
        .ok_or_else(|| PulseError::MetricNotFound { name: name.to_string() })?;
    Ok(Metrics::from(&stored))
}

/// Validate every DTO, then hand the whole list to the repository.
pub async fn apply_batch(repo: &dyn Repository, dtos: &[Metrics]) -> Result<()> {
    for dto in dtos {
        require_name(&dto.id)?;
        dto.validate()?;
    }
    repo.batch_update(dtos).await?;
    for dto in dtos {
        record_update(dto.mtype);
    }
    debug!(count = dtos.len(), "Batch applied");
    Ok(())
}

async fn find(repo: &dyn Repository, kind: MetricKind, id: &str) -> Result<MetricRecord> {
    require_name(id)?;
    match repo.get(&MetricName::from(id)).await? {
        Some(record) if record.kind() == kind => Ok(record),
        _ => Err(PulseError::MetricNotFound { name: id.to_string() }),
    }
}

/// Fill a query DTO with the stored value of the same name and type.
pub async fn lookup(repo: &dyn Repository, query: &Metrics) -> Result<Metrics> {
    let record = find(repo, query.mtype, &query.id).await?;
    Ok(Metrics::from(&record))
}

/// Stored value as plain text, for `/value/{type}/{name}`.
pub async fn lookup_text(repo: &dyn Repository, kind: &str, name: &str) -> Result<String> {
    let record = find(repo, parse_kind(kind)?, name).await?;
    Ok(record.value.to_string())
}

/// HTML table of every stored metric, sorted by name.
pub async fn render_index(repo: &dyn Repository) -> Result<String> {
    let mut records: Vec<MetricRecord> = repo.get_all().await?.into_values().collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));

    let mut html = String::from(r#"<html><body><table border="1">"#);
    for record in &records {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(record.name.as_str()),
            record.value
        );
    }
    html.push_str("</table></body></html>");
    Ok(html)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// The `/update/{type}/{name}/{value}` form.
pub async fn apply_path_update(
    repo: &dyn Repository,
    kind: &str,
    name: &str,
    raw_value: &str,
) -> Result<()> {
    let kind = parse_kind(kind)?;
    require_name(name)?;
    require_name(raw_value)?;
    let value = MetricValue::parse(kind, raw_value)?;

    let name = MetricName::from(name);
    match repo.get(&name).await? {
        Some(existing) => repo.update(&existing, value).await?,
        None => repo.insert(MetricRecord::new(name, value)).await?,
    }
    record_update(kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepository;
    use crate::transport::compress::gzip;
    use crate::transport::signing::sign;

    #[test]
    fn test_decode_plain_body() {
        let body = decode_body(BodyHeaders::default(), b"[]", None, None).unwrap();
        assert_eq!(body, b"[]");
    }

    #[test]
    fn test_decode_gzip_and_signature() {
        let json = br#"{"id":"PollCount","type":"counter","delta":1}"#;
        let signature = sign(json, "secret").unwrap();
        let packed = gzip(json).unwrap();
        let headers =
            BodyHeaders { content_encoding: Some("gzip"), signature: Some(signature.as_str()) };

        let body = decode_body(headers, &packed, Some("secret"), None).unwrap();
        assert_eq!(body, json);

        let err = decode_body(headers, &packed, Some("other"), None).unwrap_err();
        assert!(matches!(err, PulseError::SignatureInvalid { .. }));

        let unsigned = BodyHeaders { signature: None, ..headers };
        let err = decode_body(unsigned, &packed, Some("secret"), None).unwrap_err();
        assert!(matches!(err, PulseError::SignatureInvalid { .. }));
    }

    #[tokio::test]
    async fn test_apply_metric_returns_accumulated_value() {
        let repo = MemoryRepository::new();
        apply_metric(&repo, &Metrics::counter("PollCount", 2)).await.unwrap();
        let stored = apply_metric(&repo, &Metrics::counter("PollCount", 3)).await.unwrap();
        assert_eq!(stored, Metrics::counter("PollCount", 5));
    }

    #[tokio::test]
    async fn test_apply_metric_empty_name_is_not_found() {
        let repo = MemoryRepository::new();
        let err = apply_metric(&repo, &Metrics::gauge("", 1.0)).await.unwrap_err();
        assert!(matches!(err, PulseError::MetricNotFound { .. }));
    }

    #[tokio::test]
    async fn test_apply_batch_validates_before_applying() {
        let repo = MemoryRepository::new();
        let batch = [Metrics::gauge("Alloc", 1.0), Metrics::query("Frees", MetricKind::Counter)];
        let err = apply_batch(&repo, &batch).await.unwrap_err();
        assert!(matches!(err, PulseError::InvalidMetric { .. }));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_lookup_requires_matching_type() {
        let repo = MemoryRepository::new();
        apply_metric(&repo, &Metrics::gauge("Alloc", 12.5)).await.unwrap();

        let found = lookup(&repo, &Metrics::query("Alloc", MetricKind::Gauge)).await.unwrap();
        assert_eq!(found, Metrics::gauge("Alloc", 12.5));

        let err = lookup(&repo, &Metrics::query("Alloc", MetricKind::Counter)).await.unwrap_err();
        assert!(matches!(err, PulseError::MetricNotFound { .. }));
    }

    #[tokio::test]
    async fn test_path_update_and_text_lookup() {
        let repo = MemoryRepository::new();
        apply_path_update(&repo, "counter", "PollCount", "4").await.unwrap();
        apply_path_update(&repo, "counter", "PollCount", "6").await.unwrap();
        apply_path_update(&repo, "gauge", "Alloc", "1024").await.unwrap();

        assert_eq!(lookup_text(&repo, "counter", "PollCount").await.unwrap(), "10");
        assert_eq!(lookup_text(&repo, "gauge", "Alloc").await.unwrap(), "1024");

        let err = apply_path_update(&repo, "gauge", "Alloc", "abc").await.unwrap_err();
        assert!(matches!(err, PulseError::InvalidMetric { .. }));
        let err = apply_path_update(&repo, "histogram", "Alloc", "1").await.unwrap_err();
        assert!(matches!(err, PulseError::InvalidMetric { .. }));
        let err = lookup_text(&repo, "gauge", "Missing").await.unwrap_err();
        assert!(matches!(err, PulseError::MetricNotFound { .. }));
    }

    #[tokio::test]
    async fn test_path_update_rejects_non_finite_gauge() {
        let repo = MemoryRepository::new();
        for raw in ["NaN", "inf", "-Infinity"] {
            let err = apply_path_update(&repo, "gauge", "Temp", raw).await.unwrap_err();
            assert!(matches!(err, PulseError::InvalidMetric { .. }), "{raw}");
        }
        assert!(repo.is_empty().await);
        assert_eq!(render_index(&repo).await.unwrap().matches("<tr>").count(), 0);
    }

    #[tokio::test]
    async fn test_render_index() {
        let repo = MemoryRepository::new();
        apply_path_update(&repo, "gauge", "<b>", "1.5").await.unwrap();
        apply_path_update(&repo, "counter", "PollCount", "2").await.unwrap();

        let html = render_index(&repo).await.unwrap();
        assert_eq!(
            html,
            "<html><body><table border=\"1\">\
             <tr><td>&lt;b&gt;</td><td>1.5</td></tr>\
             <tr><td>PollCount</td><td>2</td></tr>\
             </table></body></html>"
        );
    }
}
