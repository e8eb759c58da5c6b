//! 发现信标
//!
//! 在发现端口上提供一个极小的 HTTP 服务：
//! - 让其他节点的 TCP 探测能够连通
//! - `GET /` 返回本机名称和平台，并通过响应头给出主机名提示

use log::{error, info};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue, header},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::LocalIdentity;
use super::identify::{HOST_HEADER, PLATFORM_HEADER};

/// 信标响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconInfo {
    pub name: String,
    pub platform: String,
    pub version: String,
}

pub fn beacon_router(identity: LocalIdentity) -> Router {
    Router::new()
        .route("/", get(beacon_handler))
        .with_state(Arc::new(identity))
}

/// 在给定监听器上运行信标，直到取消
pub async fn serve_beacon(
    listener: TcpListener,
    identity: LocalIdentity,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!("Discovery beacon listening on {}", listener.local_addr()?);

    let app = beacon_router(identity);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
    {
        error!("Beacon server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn beacon_handler(State(identity): State<Arc<LocalIdentity>>) -> impl IntoResponse {
    let server = format!(
        "lanshare/{} ({})",
        env!("CARGO_PKG_VERSION"),
        identity.platform_label
    );

    let mut headers = Vec::new();
    if let Ok(v) = HeaderValue::from_str(&server) {
        headers.push((header::SERVER, v));
    }
    if let Ok(v) = HeaderValue::from_str(&identity.display_name) {
        headers.push((HeaderName::from_static(HOST_HEADER), v));
    }
    if let Ok(v) = HeaderValue::from_str(&identity.platform_label) {
        headers.push((HeaderName::from_static(PLATFORM_HEADER), v));
    }

    let mut response = Json(BeaconInfo {
        name: identity.display_name.clone(),
        platform: identity.platform_label.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
    .into_response();
    response.headers_mut().extend(headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::PeerIdentifier;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn test_beacon_identifies_itself() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let identity = LocalIdentity {
            address: Ipv4Addr::LOCALHOST,
            display_name: "darkroom".to_string(),
            platform_label: "macOS".to_string(),
        };
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_beacon(listener, identity, cancel.clone()));

        let resp = reqwest::get(format!("http://127.0.0.1:{}/", port))
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-lanshare-host"], "darkroom");
        assert!(
            resp.headers()["server"]
                .to_str()
                .unwrap()
                .ends_with("(macOS)")
        );
        let info: BeaconInfo = resp.json().await.unwrap();
        assert_eq!(info.name, "darkroom");

        // 反向 DNS 对 127.0.0.1 可能返回 localhost，平台总能从头中识别
        let identifier = PeerIdentifier::new(port, port, Duration::from_secs(1));
        let peer = identifier.identify_peer(Ipv4Addr::LOCALHOST).await;
        assert_eq!(peer.platform_label, "macOS");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
