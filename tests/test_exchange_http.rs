//! HTTP-level tests for the exchange adapters
//!
//! A local TCP listener plays the exchange: it answers each connection with the
//! next canned response and records the request line, so the real reqwest path
//! (query string, status mapping, body read) runs under `Retrying`.

#[cfg(test)]
mod exchange_http_tests {
    use ohlcflow::exchange::{
        http_client, BinanceAdapter, CandleSource, FetchError, HttpTimeouts, KucoinAdapter, RetryPolicy,
        Retrying,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct CannedServer {
        url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl CannedServer {
        fn request_lines(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    /// Serve `responses` in order, one per connection
    async fn serve(path: &str, responses: Vec<(u16, String)>) -> CannedServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };

                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let line = request.lines().next().unwrap_or_default().to_string();
                seen.lock().unwrap().push(line);

                let reason = if status == 200 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        CannedServer {
            url: format!("http://{}{}", addr, path),
            requests,
        }
    }

    fn client() -> reqwest::Client {
        http_client(&HttpTimeouts::default()).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    const WATERMARK: i64 = 1_700_000_040_000;

    const BINANCE_PAGE: &str = r#"[
        [1700000040000, "36500.10", "36510.00", "36490.55", "36505.20", "12.345", 1700000099999, "0", 1, "0", "0", "0"],
        [1700000100000, "36505.20", "36520.00", "36500.00", "36518.75", "8.5", 1700000159999, "0", 1, "0", "0", "0"]
    ]"#;

    #[tokio::test]
    async fn test_binance_recovers_after_two_server_errors() {
        let server = serve(
            "/api/v3/klines",
            vec![
                (500, r#"{"msg":"boom"}"#.to_string()),
                (500, r#"{"msg":"boom"}"#.to_string()),
                (200, BINANCE_PAGE.to_string()),
            ],
        )
        .await;
        let source = Retrying::new(BinanceAdapter::new(client(), server.url.clone()), policy());

        let candles = source.fetch_candles("BTCUSDT", Some(WATERMARK)).await.unwrap();

        // The watermark bar is echoed back by the page and dropped
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, 1_700_000_100_000);
        assert_eq!(candles[0].close, 36518.75);
        assert_eq!(candles[0].exchange, "binance");

        let lines = server.request_lines();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert!(line.starts_with("GET /api/v3/klines?"), "{}", line);
            assert!(line.contains("symbol=BTCUSDT"));
            assert!(line.contains("interval=1m"));
            assert!(line.contains("limit=1000"));
            assert!(line.contains("startTime=1700000040001"));
        }
    }

    #[tokio::test]
    async fn test_binance_persistent_status_exhausts_retries() {
        let server = serve(
            "/api/v3/klines",
            vec![(404, String::new()), (404, String::new()), (404, String::new())],
        )
        .await;
        let source = Retrying::new(BinanceAdapter::new(client(), server.url.clone()), policy());

        let err = source.fetch_candles("BTCUSDT", None).await.unwrap_err();

        match err {
            FetchError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *last,
                    FetchError::HttpStatus {
                        exchange: "binance",
                        status: 404
                    }
                ));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(server.request_lines().len(), 3);
        assert!(!server.request_lines()[0].contains("startTime"));
    }

    #[tokio::test]
    async fn test_kucoin_error_code_under_http_200_is_retried() {
        let server = serve(
            "/api/v1/market/candles",
            vec![
                (200, r#"{"code":"429000","msg":"Too many requests"}"#.to_string()),
                (
                    200,
                    r#"{"code":"200000","data":[
                        ["1700000100", "36505.2", "36518.7", "36520.0", "36500.0", "8.5", "310000.0"],
                        ["1700000040", "36500.1", "36505.2", "36510.0", "36490.5", "12.3", "450000.0"]
                    ]}"#
                    .to_string(),
                ),
            ],
        )
        .await;
        let source = Retrying::new(KucoinAdapter::new(client(), server.url.clone()), policy());

        let candles = source.fetch_candles("BTCUSDT", Some(WATERMARK)).await.unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, 1_700_000_100_000);
        assert_eq!(candles[0].close, 36518.7);
        assert_eq!(candles[0].exchange, "kucoin");

        let lines = server.request_lines();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert!(line.starts_with("GET /api/v1/market/candles?"), "{}", line);
            assert!(line.contains("symbol=BTC-USDT"));
            assert!(line.contains("type=1min"));
            assert!(line.contains("startAt=1700000040"));
        }
    }

    #[tokio::test]
    async fn test_kucoin_error_code_every_attempt_is_upstream_failure() {
        let body = r#"{"code":"400100","msg":"This pair is not provided at present"}"#.to_string();
        let server = serve(
            "/api/v1/market/candles",
            vec![(200, body.clone()), (200, body.clone()), (200, body)],
        )
        .await;
        let source = Retrying::new(KucoinAdapter::new(client(), server.url.clone()), policy());

        let err = source.fetch_candles("BTCUSDT", None).await.unwrap_err();

        match err {
            FetchError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                match *last {
                    FetchError::Upstream { exchange, code, .. } => {
                        assert_eq!(exchange, "kucoin");
                        assert_eq!(code, "400100");
                    }
                    other => panic!("expected Upstream, got {:?}", other),
                }
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(server.request_lines().len(), 3);
    }
}
