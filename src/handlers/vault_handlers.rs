//! HTTP handlers for creating, reading and downloading vault items.
//!
//! Storage and policy live in `VaultService`; this module owns the form
//! parsing and response framing. Read and download bodies are wrapped so the
//! post-delivery bookkeeping (one-time consumption, view counting) runs only
//! once the whole body has been handed to the transport.

use crate::{
    errors::AppError,
    models::vault_record::{DEFAULT_MEDIA_TYPE, VaultKind, VaultRecord},
    services::vault_service::{Attachment, Submission, VaultError, VaultService},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, future, stream};
use serde::{Deserialize, Serialize};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::runtime::Handle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// `?password=` accepted by the read and download routes.
#[derive(Debug, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: Uuid,
}

/// Raw multipart fields of a create request.
#[derive(Default)]
struct CreateForm {
    kind: Option<String>,
    content: Option<String>,
    password: Option<String>,
    expires_at: Option<String>,
    one_time: Option<String>,
    attachment: Option<Attachment>,
}

impl CreateForm {
    /// Validate the text fields. The attachment is moved into the submission.
    fn take_submission(&mut self) -> Result<Submission, VaultError> {
        let kind = self
            .kind
            .as_deref()
            .ok_or_else(|| VaultError::Validation("missing field `type`".into()))?;
        let kind = VaultKind::parse(kind)
            .ok_or_else(|| VaultError::Validation(format!("unknown type `{kind}`")))?;

        let expires_at = self
            .expires_at
            .as_deref()
            .ok_or_else(|| VaultError::Validation("missing field `expires_at`".into()))?;
        let expires_at = DateTime::parse_from_rfc3339(expires_at)
            .map_err(|err| VaultError::Validation(format!("invalid `expires_at`: {err}")))?
            .with_timezone(&Utc);

        Ok(Submission {
            kind,
            content: self.content.take(),
            attachment: self.attachment.take(),
            secret: self.password.take().filter(|p| !p.is_empty()),
            expires_at,
            one_time: self.one_time.as_deref() == Some("true"),
        })
    }

    async fn discard(&mut self, service: &VaultService) {
        if let Some(attachment) = self.attachment.take() {
            service.discard_attachment(&attachment).await;
        }
    }
}

/// `POST /vault/create` — multipart form with `type`, `expires_at`,
/// `is_one_time`, optional `password`, and `content` or `file`.
pub async fn create_vault(
    State(service): State<VaultService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = CreateForm::default();

    let submission = match read_form(&service, &mut multipart, &mut form).await {
        Ok(()) => form.take_submission().map_err(AppError::from),
        Err(err) => Err(err),
    };
    let submission = match submission {
        Ok(submission) => submission,
        Err(err) => {
            form.discard(&service).await;
            return Err(err);
        }
    };

    let record = service.create(submission).await?;
    Ok((StatusCode::CREATED, Json(CreateResponse { id: record.id })))
}

/// Pull every field out of the multipart body. The file part is streamed
/// straight into the blob store.
async fn read_form(
    service: &VaultService,
    multipart: &mut Multipart,
    form: &mut CreateForm,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let display_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("file")
                    .to_string();
                let media_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_MEDIA_TYPE)
                    .to_string();

                let mut upstream: Option<MultipartError> = None;
                let chunks = field.map(|chunk| {
                    chunk.map_err(|err| {
                        let io_err = io::Error::other(err.body_text());
                        upstream = Some(err);
                        io_err
                    })
                });
                let stored = service
                    .store_attachment(display_name, media_type, chunks)
                    .await;

                let attachment = match (stored, upstream) {
                    (Ok(attachment), _) => attachment,
                    // Body errors (e.g. size limit) keep their own status.
                    (Err(_), Some(err)) => return Err(err.into()),
                    (Err(err), None) => return Err(err.into()),
                };
                if let Some(previous) = form.attachment.replace(attachment) {
                    service.discard_attachment(&previous).await;
                }
            }
            "type" | "content" | "password" | "expires_at" | "is_one_time" => {
                let value = field.text().await?;
                let slot = match name.as_str() {
                    "type" => &mut form.kind,
                    "content" => &mut form.content,
                    "password" => &mut form.password,
                    "expires_at" => &mut form.expires_at,
                    _ => &mut form.one_time,
                };
                *slot = Some(value);
            }
            _ => debug!(field = %name, "ignoring unknown form field"),
        }
    }
    Ok(())
}

/// `GET /vault/{id}?password=` — full record as JSON.
pub async fn get_vault(
    State(service): State<VaultService>,
    Path(id): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Result<Response, AppError> {
    let record = service.retrieve(&id, query.password.as_deref()).await?;
    let json = serde_json::to_vec(&record).map_err(AppError::internal)?;

    let size = json.len() as u64;
    let body = stream::once(future::ready(Ok::<_, io::Error>(Bytes::from(json))));
    let mut response = Response::new(settle_after_send(body, size, service, record));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

/// `GET /vault/{id}/download?password=` — stream the attached file.
pub async fn download_vault(
    State(service): State<VaultService>,
    Path(id): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Result<Response, AppError> {
    let download = service
        .open_download(&id, query.password.as_deref())
        .await?;

    let media_type = download
        .record
        .media_type
        .clone()
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.into());
    let disposition = content_disposition(download.record.display_name.as_deref());
    let size = download.size;

    let body = settle_after_send(
        ReaderStream::new(download.file),
        size,
        service,
        download.record,
    );
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&media_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MEDIA_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    Ok(response)
}

/// Wrap a payload so `settle` runs once all `size` bytes have been handed to
/// the transport.
fn settle_after_send<S>(
    payload: S,
    size: u64,
    service: VaultService,
    record: VaultRecord,
) -> Body
where
    S: Stream<Item = io::Result<Bytes>> + Unpin + Send + 'static,
{
    Body::from_stream(SettleOnDelivery {
        payload,
        expected: size,
        sent: 0,
        pending: Some((service, record)),
    })
}

/// Counts the bytes a response body yields and settles the item when the body
/// is dropped with everything sent. The end of the stream is not a reliable
/// signal: with `Content-Length` set, hyper stops polling as soon as the
/// declared length is written. A client that disconnects early leaves `sent`
/// short and nothing is consumed.
struct SettleOnDelivery<S> {
    payload: S,
    expected: u64,
    sent: u64,
    pending: Option<(VaultService, VaultRecord)>,
}

impl<S> Stream for SettleOnDelivery<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.payload).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            self.sent += chunk.len() as u64;
        }
        polled
    }
}

impl<S> Drop for SettleOnDelivery<S> {
    fn drop(&mut self) {
        let Some((service, record)) = self.pending.take() else {
            return;
        };
        if self.sent < self.expected {
            debug!(
                id = %record.id,
                sent = self.sent,
                expected = self.expected,
                "body not fully delivered, item left in place"
            );
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { service.settle(&record).await });
            }
            Err(_) => warn!(id = %record.id, "no runtime to settle delivered item"),
        }
    }
}

/// `attachment; filename="..."` with quotes and anything outside printable
/// ASCII replaced by `_`.
fn content_disposition(display_name: Option<&str>) -> String {
    let name: String = display_name
        .unwrap_or("file")
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{name}\"")
}
