// Switchyard
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Generic code for the HTTP surface.
//!
//! Integration tests of the routes of an app should be written against the `Router` returned by
//! `routes::build` using the `testutils` in this module.  The tests within a module should define
//! a `route` function that returns the HTTP method and the path under test, and all tests should
//! rely on it to ensure they all test the desired route.

use crate::service::{ServiceError, ServiceResult};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Name of the header that carries the app-specific return code of a response.
pub const X_RETURN_CODE: HeaderName = HeaderName::from_static("x-return-code");

/// Name of the header that carries the correlation identifier of a request.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Representation of the details of an error response.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct ErrorResponse {
    /// Name of the error.
    pub(crate) name: String,

    /// Textual representation of the error message.
    pub(crate) message: String,
}

/// Extracts the header `name` from `headers` and ensures it has at most one value.
pub fn get_unique_header<'a>(
    headers: &'a HeaderMap,
    name: &HeaderName,
) -> ServiceResult<Option<&'a HeaderValue>> {
    let mut iter = headers.get_all(name).iter();
    let value = iter.next();
    if iter.next().is_some() {
        return Err(ServiceError::named(
            "InvalidRequest",
            format!("Header {} cannot have more than one value", name.as_str()),
        ));
    }
    Ok(value)
}

/// Common test code for apps built on the framework.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{self, StatusCode};
    use axum::response::Response;
    use serde::de::DeserializeOwned;
    use tower::util::ServiceExt;

    /// Maximum body size for testing purposes.
    const MAX_BODY_SIZE: usize = 64 * 1024;

    /// Initializes logging for tests.  Safe to call multiple times.
    pub fn setup_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Builder for a single request to the API server.
    #[must_use]
    pub struct OneShotBuilder {
        /// The router for the app being tested.
        app: Router,

        /// Builder for the request that will be sent to the app.
        builder: http::request::Builder,
    }

    impl OneShotBuilder {
        /// Creates a new request against a given `method`/`uri` pair served by an `app` router.
        pub fn new<U: AsRef<str>>(app: Router, (method, uri): (http::Method, U)) -> Self {
            let builder = Request::builder().method(method).uri(uri.as_ref());
            Self { app, builder }
        }

        /// Extends the URI in the request with a `query`.
        pub fn with_query<Q: Serialize>(mut self, query: Q) -> Self {
            let uri = self.builder.uri_ref().unwrap().to_string();
            assert!(!uri.contains('?'), "URI already contains a query: {}", uri);
            self.builder = self.builder.uri(format!(
                "{}?{}",
                uri,
                serde_urlencoded::to_string(query).unwrap()
            ));
            self
        }

        /// Sets the header `name` to `value` in the outgoing request.
        pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
        where
            HeaderName: TryFrom<K>,
            <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
            HeaderValue: TryFrom<V>,
            <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
        {
            self.builder = self.builder.header(name, value);
            self
        }

        /// Finishes building the request and sends it with an empty payload.
        pub async fn send_empty(self) -> ResponseChecker {
            let request = self.builder.body(Body::empty()).unwrap();
            ResponseChecker::from(self.app.oneshot(request).await.unwrap())
        }

        /// Finishes building the request and sends it with a text payload.
        pub async fn send_text<T: Into<String>>(self, text: T) -> ResponseChecker {
            let request = self
                .builder
                .header(http::header::CONTENT_TYPE, mime::TEXT_PLAIN.as_ref())
                .body(Body::from(text.into()))
                .unwrap();
            ResponseChecker::from(self.app.oneshot(request).await.unwrap())
        }

        /// Finishes building the request and sends it with a JSON payload.
        pub async fn send_json<T: Serialize>(self, request: T) -> ResponseChecker {
            let request = self
                .builder
                .header(http::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                .body(Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap();
            ResponseChecker::from(self.app.oneshot(request).await.unwrap())
        }
    }

    /// Validator for the outcome of a request sent by a `OneShotBuilder`.
    #[must_use]
    pub struct ResponseChecker {
        /// Actual response that we received from the app.
        response: Response,

        /// Expected HTTP status code in the response above.
        exp_status: StatusCode,

        /// Expected value of the `X-Return-Code` header, where `Some(None)` means that the header
        /// must be absent and `None` means that it is not checked.
        exp_return_code: Option<Option<u32>>,
    }

    impl From<Response> for ResponseChecker {
        fn from(response: Response) -> Self {
            Self { response, exp_status: StatusCode::OK, exp_return_code: None }
        }
    }

    impl ResponseChecker {
        /// Sets the expected exit HTTP status to `status`.
        pub fn expect_status(mut self, status: StatusCode) -> Self {
            self.exp_status = status;
            self
        }

        /// Sets the expected value of the `X-Return-Code` header to `code`.
        pub fn expect_return_code(mut self, code: u32) -> Self {
            self.exp_return_code = Some(Some(code));
            self
        }

        /// Expects the response to not carry an `X-Return-Code` header.
        pub fn expect_no_return_code(mut self) -> Self {
            self.exp_return_code = Some(None);
            self
        }

        /// Performs common validation operations on the response.
        pub fn verify(&self) {
            assert_eq!(self.exp_status, self.response.status());

            if let Some(exp_return_code) = self.exp_return_code {
                let return_code = self
                    .response
                    .headers()
                    .get(X_RETURN_CODE)
                    .map(|v| v.to_str().unwrap().parse::<u32>().unwrap());
                assert_eq!(exp_return_code, return_code);
            }
        }

        /// Returns the value of the header `name` in the response, if present.
        pub fn header(&self, name: &str) -> Option<String> {
            self.response.headers().get(name).map(|v| v.to_str().unwrap().to_owned())
        }

        /// Finishes checking the response and returns its body as raw bytes.
        async fn take_body(self) -> Vec<u8> {
            self.verify();

            let body =
                axum::body::to_bytes(self.response.into_body(), MAX_BODY_SIZE).await.unwrap();
            body.to_vec()
        }

        /// Finishes checking the response and expects it to contain an empty body.
        pub async fn expect_empty(self) {
            let body = String::from_utf8(self.take_body().await).unwrap();
            assert!(body.is_empty(), "Body not empty; got {}", body);
        }

        /// Finishes checking the response and expects its body to be an error response with
        /// `exp_name` and a message that matches `exp_re`.
        pub async fn expect_error(self, exp_name: &str, exp_re: &str) {
            let body = self.take_body().await;
            let response: ErrorResponse = match serde_json::from_slice(&body) {
                Ok(response) => response,
                Err(e) => {
                    let body = String::from_utf8(body).unwrap();
                    panic!("Invalid error response due to {}; content was {}", e, body);
                }
            };
            assert_eq!(exp_name, response.name);
            let re = regex::Regex::new(exp_re).unwrap();
            assert!(
                re.is_match(&response.message),
                "Response content '{:?}' does not match re '{}'",
                response,
                exp_re
            );
        }

        /// Finishes checking the response and expects it to contain a valid JSON object of
        /// type `T`.
        pub async fn expect_json<T: DeserializeOwned>(self) -> T {
            let body = self.take_body().await;
            serde_json::from_slice::<T>(&body).unwrap()
        }

        /// Finishes checking the response and expects its body to be valid UTF-8 and to match
        /// `exp_re`.
        pub async fn expect_text(self, exp_re: &str) {
            assert!(!exp_re.is_empty(), "Use expect_empty to validate empty responses");

            let body = String::from_utf8(self.take_body().await).unwrap();
            let re = regex::Regex::new(exp_re).unwrap();
            assert!(re.is_match(&body), "Body content '{}' does not match re '{}'", body, exp_re);
        }

        /// Finishes checking the response and returns the response itself for out of band
        /// validation of properties not supported by the `ResponseChecker`.
        pub async fn take_response(self) -> Response {
            self.verify();

            self.response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unique_header_missing() {
        let mut headers = HeaderMap::new();
        headers.append("ignore-me", "ignored".parse().unwrap());
        assert!(get_unique_header(&headers, &X_REQUEST_ID).unwrap().is_none());
    }

    #[test]
    fn test_get_unique_header_one() {
        let mut headers = HeaderMap::new();
        headers.append("ignore-me", "ignored".parse().unwrap());
        headers.append("x-request-id", "foo".parse().unwrap());
        assert_eq!(b"foo", get_unique_header(&headers, &X_REQUEST_ID).unwrap().unwrap().as_bytes());
    }

    #[test]
    fn test_get_unique_header_many() {
        let mut headers = HeaderMap::new();
        headers.append("x-request-id", "foo".parse().unwrap());
        headers.append("ignore-me", "ignored".parse().unwrap());
        headers.append("X-Request-Id", "bar".parse().unwrap());
        assert_eq!(
            ServiceError::named(
                "InvalidRequest",
                "Header x-request-id cannot have more than one value"
            ),
            get_unique_header(&headers, &X_REQUEST_ID).unwrap_err()
        );
    }
}
