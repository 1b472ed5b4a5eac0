//! Raw multipart engine against in-memory object stores
//!
//! No network is involved: the engine is handed a transport that answers
//! like a COS endpoint and records every request it sees.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mockall::mock;
use peg_core::{
    Credentials, Error, HttpRequest, HttpResponse, HttpTransport, Method, NoProgress,
    ProgressEvent, Result, UploadTarget, Uploader,
};
use peg_cos::multipart::{SLICE_SIZE, content_md5};
use peg_cos::{CosRawUploader, slice_count};
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;
const UPLOAD_ID: &str = "1585130821cbb7df1d11846c073ad648e8f33b087cec2381df437acdc833cf654b9ecc6361";
const ENDPOINT: &str = "https://b1-123.cos.r1.myqcloud.com";

/// Answers like COS; optionally rejects one part number or resizes the
/// local file while the first part is in flight
#[derive(Default)]
struct FakeCos {
    requests: Mutex<Vec<HttpRequest>>,
    reject_part: Option<u32>,
    resize_on_first_part: Mutex<Option<(PathBuf, u64)>>,
}

impl FakeCos {
    fn rejecting_part(part: u32) -> Self {
        Self {
            reject_part: Some(part),
            ..Default::default()
        }
    }

    fn resizing_file(path: &Path, len: u64) -> Self {
        Self {
            resize_on_first_part: Mutex::new(Some((path.to_path_buf(), len))),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn puts(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::Put)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for FakeCos {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = match request.method {
            Method::Get => HttpResponse::new(200).with_body("<ListMultipartUploadsResult/>"),
            Method::Post if request.query_value("uploads").is_some() => {
                HttpResponse::new(200).with_body(format!(
                    "<InitiateMultipartUploadResult><Bucket>b1-123</Bucket>\
                     <Key>pre/docs/file.bin</Key><UploadId>{UPLOAD_ID}</UploadId>\
                     </InitiateMultipartUploadResult>"
                ))
            }
            Method::Put => {
                if let Some((path, len)) = self.resize_on_first_part.lock().unwrap().take() {
                    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
                    file.set_len(len).unwrap();
                }
                let part: u32 = request.query_value("partnumber").unwrap().parse().unwrap();
                if self.reject_part == Some(part) {
                    HttpResponse::new(500).with_body("<Error><Code>InternalError</Code></Error>")
                } else {
                    HttpResponse::new(200).with_header("ETag", "\"fixed-etag\"")
                }
            }
            Method::Post => HttpResponse::new(200).with_body(
                "<CompleteMultipartUploadResult><ETag>&quot;final-etag-3&quot;</ETag>\
                 </CompleteMultipartUploadResult>",
            ),
        };
        self.requests.lock().unwrap().push(request);
        Ok(response)
    }
}

mock! {
    pub Transport {}

    #[async_trait]
    impl HttpTransport for Transport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
    }
}

fn credentials() -> Credentials {
    let info = STANDARD.encode(r#"{"bucket":"b1-123","region":"r1","preprefix":"/pre/"}"#);
    Credentials::decode("session-token", "AKID", "SECRET", info.trim_end_matches('=')).unwrap()
}

fn write_file(dir: &Path, name: &str, size: usize) -> (UploadTarget, Vec<u8>) {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &data).unwrap();
    (UploadTarget::from_path(&path).unwrap(), data)
}

fn auth_field(request: &HttpRequest, name: &str) -> String {
    let auth = request.header_value("authorization").unwrap();
    auth.split('&')
        .find_map(|kv| kv.strip_prefix(&format!("{name}=")))
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_upload_sends_every_slice_in_order() {
    let dir = TempDir::new().unwrap();
    let (target, data) = write_file(dir.path(), "file.bin", 5 * MIB + 1);
    let fake = Arc::new(FakeCos::default());
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone());

    let events = Mutex::new(Vec::new());
    let observer = |e: ProgressEvent| events.lock().unwrap().push(e);
    let outcome = uploader.upload(&target, "/docs", &observer).await.unwrap();

    let expected_slices = slice_count(data.len() as u64) as usize;
    assert_eq!(expected_slices, 3);
    assert_eq!(outcome.key, "pre/docs/file.bin");
    assert_eq!(outcome.parts, expected_slices);
    assert_eq!(outcome.size_bytes, data.len() as u64);
    assert_eq!(outcome.etag.as_deref(), Some("final-etag-3"));

    let methods: Vec<Method> = fake.requests().iter().map(|r| r.method).collect();
    assert_eq!(
        methods,
        vec![Method::Get, Method::Post, Method::Put, Method::Put, Method::Put, Method::Post]
    );

    let puts = fake.puts();
    let mut sent = Vec::new();
    for (index, put) in puts.iter().enumerate() {
        let part = (index + 1).to_string();
        assert_eq!(put.url, format!("{ENDPOINT}/pre/docs/file.bin"));
        assert_eq!(put.query_value("partnumber"), Some(part.as_str()));
        assert_eq!(put.query_value("uploadid"), Some(UPLOAD_ID));
        assert_eq!(
            put.header_value("content-length"),
            Some(put.body.len().to_string().as_str())
        );
        sent.extend_from_slice(&put.body);
    }
    assert_eq!(puts[0].body.len(), SLICE_SIZE as usize);
    assert_eq!(puts[1].body.len(), SLICE_SIZE as usize);
    assert_eq!(puts[2].body.len(), MIB + 1);
    assert_eq!(sent, data);

    let fractions: Vec<f64> = events.lock().unwrap().iter().map(|e| e.fraction).collect();
    assert_eq!(fractions, vec![1.0 / 3.0, 2.0 / 3.0, 1.0, 1.0]);
    assert_eq!(events.lock().unwrap()[0].label, "fixed-etag");
}

#[tokio::test]
async fn test_completion_manifest_matches_slices() {
    let dir = TempDir::new().unwrap();
    let (target, data) = write_file(dir.path(), "big.bin", 10 * MIB);
    let fake = Arc::new(FakeCos::default());
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone()).with_probe(false);

    uploader.upload(&target, "", &NoProgress).await.unwrap();

    let requests = fake.requests();
    let complete = requests.last().unwrap();
    assert_eq!(complete.method, Method::Post);
    assert_eq!(complete.query_value("uploadid"), Some(UPLOAD_ID));
    assert_eq!(complete.header_value("content-type"), Some("application/xml"));

    let body = String::from_utf8(complete.body.clone()).unwrap();
    let slices = slice_count(data.len() as u64) as usize;
    assert_eq!(slices, 5);
    assert_eq!(body.matches("<Part>").count(), slices);

    let mut cursor = 0;
    for n in 1..=slices {
        let tag = format!("<PartNumber>{n}</PartNumber><ETag>&quot;fixed-etag&quot;</ETag>");
        let at = body[cursor..].find(&tag).expect("parts listed in ascending order");
        cursor += at + tag.len();
    }

    assert_eq!(
        complete.header_value("content-md5"),
        Some(content_md5(&complete.body).as_str())
    );
}

#[tokio::test]
async fn test_three_mib_goes_out_as_one_slice() {
    let dir = TempDir::new().unwrap();
    let (target, data) = write_file(dir.path(), "three.bin", 3 * MIB);
    let fake = Arc::new(FakeCos::default());
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone());

    let outcome = uploader.upload(&target, "docs", &NoProgress).await.unwrap();

    let puts = fake.puts();
    assert_eq!(outcome.parts, 1);
    assert_eq!(puts.len(), 1);
    // the single slice exceeds the nominal slice size
    assert_eq!(puts[0].body.len(), data.len());
    assert!(puts[0].body.len() as u64 > SLICE_SIZE);
}

#[tokio::test]
async fn test_empty_file_is_one_empty_part() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "empty.txt", 0);
    let fake = Arc::new(FakeCos::default());
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone());

    let outcome = uploader.upload(&target, "docs", &NoProgress).await.unwrap();

    assert_eq!(outcome.parts, 1);
    let puts = fake.puts();
    assert_eq!(puts.len(), 1);
    assert!(puts[0].body.is_empty());
    assert_eq!(puts[0].header_value("content-length"), Some("0"));
}

#[tokio::test]
async fn test_every_call_is_signed_with_its_own_key_sets() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "report.pdf", 1024);
    let fake = Arc::new(FakeCos::default());
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone());

    uploader.upload(&target, "docs", &NoProgress).await.unwrap();

    let requests = fake.requests();
    assert_eq!(requests.len(), 4);
    for request in &requests {
        assert_eq!(request.header_value("x-cos-security-token"), Some("session-token"));
        assert_eq!(auth_field(request, "q-ak"), "AKID");
        assert_eq!(auth_field(request, "q-sign-algorithm"), "sha1");
    }

    let probe = &requests[0];
    assert_eq!(probe.query_value("prefix"), Some("pre/docs/report.pdf"));
    assert_eq!(probe.header_value("content-type"), Some("application/pdf"));
    assert_eq!(auth_field(probe, "q-url-param-list"), "prefix;uploads");
    assert_eq!(auth_field(probe, "q-header-list"), "");

    let initiate = &requests[1];
    assert_eq!(initiate.header_value("x-cos-storage-class"), Some("Standard"));
    assert_eq!(auth_field(initiate, "q-url-param-list"), "uploads");
    assert_eq!(auth_field(initiate, "q-header-list"), "x-cos-storage-class");

    let put = &requests[2];
    assert_eq!(auth_field(put, "q-url-param-list"), "partnumber;uploadid");
    assert_eq!(auth_field(put, "q-header-list"), "content-length");

    let complete = &requests[3];
    assert_eq!(auth_field(complete, "q-url-param-list"), "uploadid");
    assert_eq!(auth_field(complete, "q-header-list"), "content-md5");
}

#[tokio::test]
async fn test_failed_part_aborts_before_completion() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "file.bin", 7 * MIB);
    let fake = Arc::new(FakeCos::rejecting_part(2));
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone());

    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("InternalError"));
    assert_eq!(fake.puts().len(), 2);
    let last = fake.requests().pop().unwrap();
    assert_eq!(last.method, Method::Put);
}

#[tokio::test]
async fn test_file_shrinking_mid_upload_is_io_error() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "file.bin", 5 * MIB + 1);
    let fake = Arc::new(FakeCos::resizing_file(&target.local_path, (4 * MIB + 10) as u64));
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone()).with_probe(false);

    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    assert_eq!(fake.puts().len(), 2);
    let completed = fake
        .requests()
        .iter()
        .any(|r| r.method == Method::Post && r.query_value("uploadid").is_some());
    assert!(!completed);
}

#[tokio::test]
async fn test_file_growing_mid_upload_is_io_error() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "file.bin", 5 * MIB + 1);
    let fake = Arc::new(FakeCos::resizing_file(&target.local_path, (6 * MIB) as u64));
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone()).with_probe(false);

    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::InvalidData));
    // the last slice is read before its PUT, so only the first two went out
    assert_eq!(fake.puts().len(), 2);
    let last = fake.requests().pop().unwrap();
    assert_eq!(last.method, Method::Put);
}

#[tokio::test]
async fn test_missing_local_file_is_io_error() {
    let fake = Arc::new(FakeCos::default());
    let uploader = CosRawUploader::new(credentials(), ENDPOINT, fake.clone()).with_probe(false);
    let target = UploadTarget::new("gone.bin", "/nonexistent/gone.bin");

    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Io(_)));
    assert!(fake.puts().is_empty());
}

#[tokio::test]
async fn test_initiate_rejected_stops_before_any_part() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "file.bin", 4 * MIB);

    let mut transport = MockTransport::new();
    transport
        .expect_send()
        .withf(|r| r.method == Method::Post && r.query_value("uploads").is_some())
        .times(1)
        .returning(|_| Ok(HttpResponse::new(403).with_body("<Error><Code>AccessDenied</Code></Error>")));

    let uploader =
        CosRawUploader::new(credentials(), ENDPOINT, Arc::new(transport)).with_probe(false);

    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert!(matches!(err, Error::Request { .. }));
}

#[tokio::test]
async fn test_probe_rejected_stops_before_initiate() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "file.bin", 16);

    let mut transport = MockTransport::new();
    transport
        .expect_send()
        .withf(|r| r.method == Method::Get)
        .times(1)
        .returning(|_| Ok(HttpResponse::new(404).with_body("NoSuchBucket")));

    let uploader = CosRawUploader::new(credentials(), ENDPOINT, Arc::new(transport));
    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_transport_failure_surfaces_as_network_error() {
    let dir = TempDir::new().unwrap();
    let (target, _) = write_file(dir.path(), "file.bin", 16);

    let mut transport = MockTransport::new();
    transport
        .expect_send()
        .times(1)
        .returning(|_| Err(Error::Network("operation timed out".into())));

    let uploader = CosRawUploader::new(credentials(), ENDPOINT, Arc::new(transport));
    let err = uploader
        .upload(&target, "docs", &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)));
}
