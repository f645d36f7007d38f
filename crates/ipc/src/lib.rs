// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-ipc: the `lfctl` <-> `lfd` control protocol and its wire framing.
//! `lfd` listens on a Unix domain socket; every request and response is
//! one length-prefixed JSON frame.

mod protocol;
mod wire;

pub use protocol::{Request, Response, StartAllSummary, WorkerStatusView, FACTORY_RESET_CONFIRMATION};
pub use wire::{decode, encode, read_message, read_request, write_message, write_response, ProtocolError};

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn any_request() -> impl Strategy<Value = Request> {
        prop_oneof![
            Just(Request::Ping),
            Just(Request::StatusAll),
            Just(Request::StartAll),
            Just(Request::StopAll),
            (any::<u32>(), "[a-z]{1,12}").prop_map(|(annotator, domain)| Request::WorkerStart { annotator, domain }),
            (any::<u32>(), "[a-z]{1,12}").prop_map(|(annotator, domain)| Request::WorkerStop { annotator, domain }),
            (any::<u32>(), "[a-z]{1,12}").prop_map(|(annotator, domain)| Request::WorkerPause { annotator, domain }),
            (any::<u32>(), "[a-z]{1,12}").prop_map(|(annotator, domain)| Request::WorkerResume { annotator, domain }),
            (any::<u32>(), "[a-z]{1,12}").prop_map(|(annotator, domain)| Request::WorkerRestart { annotator, domain }),
            (any::<u32>(), "[a-z]{1,12}").prop_map(|(annotator, domain)| Request::WorkerStatus { annotator, domain }),
            "[A-Z_]{0,16}".prop_map(|confirm| Request::FactoryReset { confirm }),
        ]
    }

    proptest! {
        #[test]
        fn request_round_trips_through_encode_decode(request in any_request()) {
            let frame = encode(&request).unwrap();
            let decoded: Request = decode(&frame).unwrap();
            prop_assert_eq!(decoded, request);
        }
    }
}
