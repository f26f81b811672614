use bytes::Bytes;
use chrono::SecondsFormat;
use futures_util::future::BoxFuture;
use runtime::cancel::CancelHandle;
use streaming::task::FetchError;

use crate::flyover::Flyover;

/// Supplies the raw imagery for one flyover.
pub trait FrameSource: Send + Sync + 'static {
    fn fetch_frame(
        &self,
        flyover: &Flyover,
        cancel: CancelHandle,
    ) -> BoxFuture<'static, Result<Bytes, FetchError>>;
}

/// Imagery from a URL template with `{from}`, `{to}` and `{date}` placeholders.
pub struct HttpFrameSource {
    url_template: String,
    client: reqwest::Client,
}

impl HttpFrameSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self::with_client(url_template, reqwest::Client::new())
    }

    pub fn with_client(url_template: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url_template: url_template.into(),
            client,
        }
    }

    pub fn frame_url(&self, flyover: &Flyover) -> String {
        self.url_template
            .replace(
                "{from}",
                &flyover.from_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .replace(
                "{to}",
                &flyover.to_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .replace("{date}", &flyover.from_time.format("%Y-%m-%d").to_string())
    }
}

impl FrameSource for HttpFrameSource {
    fn fetch_frame(
        &self,
        flyover: &Flyover,
        cancel: CancelHandle,
    ) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        let url = self.frame_url(flyover);
        let client = self.client.clone();
        Box::pin(async move {
            let request = async {
                let resp = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| FetchError::failed(format!("{url}: {e}")))?;
                if !resp.status().is_success() {
                    return Err(FetchError::failed(format!(
                        "{url}: HTTP {}",
                        resp.status()
                    )));
                }
                resp.bytes()
                    .await
                    .map_err(|e| FetchError::failed(format!("{url}: {e}")))
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = request => result,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameSource, HttpFrameSource};
    use crate::flyover::Flyover;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use runtime::cancel::CancelHandle;
    use streaming::task::FetchError;

    fn flyover() -> Flyover {
        Flyover::new(
            Utc.with_ymd_and_hms(2021, 7, 4, 10, 15, 0).unwrap(),
            Utc.with_ymd_and_hms(2021, 7, 4, 10, 19, 30).unwrap(),
        )
    }

    #[test]
    fn url_template_expands_times() {
        let source = HttpFrameSource::new("https://img.test/wms?TIME={from}/{to}&D={date}");
        assert_eq!(
            source.frame_url(&flyover()),
            "https://img.test/wms?TIME=2021-07-04T10:15:00Z/2021-07-04T10:19:30Z&D=2021-07-04"
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_never_hits_the_network() {
        let source = HttpFrameSource::new("http://127.0.0.1:9/{date}");
        let cancel = CancelHandle::new();
        cancel.request_cancel();
        let result = source.fetch_frame(&flyover(), cancel).await;
        assert_eq!(result.unwrap_err(), FetchError::Cancelled);
    }
}
