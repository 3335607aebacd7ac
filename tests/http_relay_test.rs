//! 通过真实 HTTP 传输跑完整服务

use payment_relay::cli::Bootstrap;
use payment_relay::service::{InstanceLock, RelayService, ServiceOptions};
use payment_relay::{NotificationEvent, TransportMode};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// 接收 `/payment-received` 请求并把 body 转发到 channel
async fn collector() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    let Some(idx) = text.find("\r\n\r\n") else {
                        continue;
                    };
                    let len = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= idx + 4 + len {
                        let body = &request[idx + 4..idx + 4 + len];
                        let _ = tx.send(String::from_utf8_lossy(body).to_string());
                        break;
                    }
                }
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}";
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), rx)
}

#[tokio::test]
async fn test_service_posts_payments_to_collector() {
    let (base, mut bodies) = collector().await;
    let dir = TempDir::new().unwrap();
    let boot = Bootstrap::with_data_dir(dir.path());
    boot.settings()
        .update(|s| {
            s.transport.mode = TransportMode::Http;
            s.transport.server_host = base.clone();
        })
        .unwrap();

    let config = boot.transport_config(None);
    let dispatcher = boot.dispatcher(&config).unwrap();
    let lock = InstanceLock::acquire(InstanceLock::default_path(boot.data_dir())).unwrap();
    let service = RelayService::new(
        Arc::new(dispatcher),
        ServiceOptions {
            keep_alive: false,
            ..Default::default()
        },
    )
    .with_instance_lock(lock);
    service.start();

    // 第二个实例拿不到锁
    assert!(InstanceLock::acquire(InstanceLock::default_path(boot.data_dir())).is_err());

    let event = NotificationEvent::new("com.bcp.bo.wallet", "¡Yape!", "Recibiste S/10 de José");
    service.submit(event.with_post_time(7));
    service.shutdown().await;

    let body = bodies.recv().await.unwrap();
    let message: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(message["title"], "Yape");
    assert_eq!(message["text"], "Recibiste S/10 de Jose");
    assert_eq!(message["postTime"], 7);

    // 记录持久化到数据目录
    let history = boot.open_history().unwrap().get_all();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].code, 200);
    assert!(history[0].url.ends_with("/payment-received"));
    assert_eq!(boot.open_archive().unwrap().len(), 1);

    // 服务停止后锁已释放
    assert!(InstanceLock::acquire(InstanceLock::default_path(boot.data_dir())).is_ok());
}
