//! CORS layer for the A2A HTTP surface. Peer orchestrators and specialist
//! agents calling `POST /` may run on arbitrary hosts/ports, so the default
//! policy is permissive; a deployment fronting the server with its own
//! gateway can swap this for a restricted layer.

use tower_http::cors::CorsLayer;

pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}
