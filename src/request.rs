//! Request building.
//!
//! Turns a resolved method and SQL-level parameters into the request that
//! will be sent, keeping the classified parameters and schema names next to
//! it as an [`HttpArmoury`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{CloudqlError, CloudqlResult};
use crate::params::{self, HttpParameters};
use crate::taxonomy::HeirarchyObjects;
use crate::transport::HttpRequest;

/// Query parameter carrying the continuation token of a list call.
pub const PAGE_TOKEN_PARAM: &str = "pageToken";

/// A request ready to send, with the context it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpArmoury {
    pub parameters: HttpParameters,
    /// Verb, resolved URL and body. Credentials are added per execution.
    pub request: HttpRequest,
    pub request_schema: Option<String>,
    pub response_schema: Option<String>,
}

impl HttpArmoury {
    /// The request with `pageToken` set to `token`.
    pub fn page(&self, token: &str) -> CloudqlResult<HttpRequest> {
        let mut url = url::Url::parse(&self.request.url).map_err(|e| {
            CloudqlError::validation(format!("invalid request URL '{}': {}", self.request.url, e))
        })?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != PAGE_TOKEN_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(PAGE_TOKEN_PARAM, token);
        Ok(HttpRequest {
            url: url.to_string(),
            ..self.request.clone()
        })
    }
}

/// Build the request for a resolved method.
///
/// `payload` is an explicit request body (EXEC `@@json`); body fields
/// supplied as parameters replace it.
pub fn build(
    heirarchy: &HeirarchyObjects,
    raw: &BTreeMap<String, Value>,
    payload: Option<&Map<String, Value>>,
) -> CloudqlResult<HttpArmoury> {
    let request_schema = heirarchy.request_schema();
    let response_schema = heirarchy.response_schema();
    let parameters = params::split(
        raw,
        &heirarchy.method,
        heirarchy.schemas(),
        request_schema,
        response_schema,
    );

    let url = heirarchy.provider.parameterise(
        &heirarchy.service.base_url,
        &heirarchy.method,
        &parameters,
    )?;
    let verb = if heirarchy.method.http_method.is_empty() {
        "GET"
    } else {
        heirarchy.method.http_method.as_str()
    };
    let mut request = HttpRequest::new(verb, url);

    if let Some(payload) = payload {
        request = request.with_json_body(&Value::Object(payload.clone()))?;
    }
    if let Some(body) = parameters.body() {
        request = request.with_json_body(&body)?;
    }
    tracing::debug!("Built {} {}", request.method, request.url);

    Ok(HttpArmoury {
        parameters,
        request,
        request_schema: heirarchy.method.request_type().map(str::to_string),
        response_schema: heirarchy.method.response_type().map(str::to_string),
    })
}
