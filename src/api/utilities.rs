// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility API endpoints.

use axum::Json;

use crate::models::{Address, ValidateAddressRequest, ValidateAddressResponse};

/// Check whether a string is a well-formed address.
#[utoipa::path(
    post,
    path = "/api/utilities/address/validate",
    tag = "Utilities",
    request_body = ValidateAddressRequest,
    responses((status = 200, description = "Validation outcome", body = ValidateAddressResponse))
)]
pub async fn validate_address(
    Json(request): Json<ValidateAddressRequest>,
) -> Json<ValidateAddressResponse> {
    match Address::parse(&request.address) {
        Ok(address) => Json(ValidateAddressResponse {
            is_valid: true,
            is_embedded: address.is_embedded(),
        }),
        Err(_) => Json(ValidateAddressResponse {
            is_valid: false,
            is_embedded: false,
        }),
    }
}
