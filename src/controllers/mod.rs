pub mod analytics;
pub mod auth;
pub mod bookings;
pub mod movies;
pub mod theaters;

use axum::Router;
use std::sync::Arc;

use crate::config::FeatureFlags;

pub fn routes(features: &FeatureFlags) -> Router<Arc<crate::AppState>> {
    let router = Router::new()
        .merge(auth::routes())
        .merge(movies::routes())
        .merge(theaters::routes())
        .merge(bookings::routes());

    if features.enable_analytics {
        router.merge(analytics::routes())
    } else {
        tracing::info!("Analytics routes disabled");
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // axum panics on overlapping routes when the table is built
    #[test]
    fn route_table_builds_with_and_without_analytics() {
        let mut features = crate::config::test_config().features;
        let _ = routes(&features);
        features.enable_analytics = false;
        let _ = routes(&features);
    }
}
