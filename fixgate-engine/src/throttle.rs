/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Synthetic Business Message Reject construction for throttled messages.
//!
//! When the session's throttle rules reject an inbound message, the gateway
//! answers with a Business Message Reject (35=j) carrying
//! BusinessRejectReason 99 ("other") and a text naming the configured limit.
//! The builder is created lazily by the sender endpoint because the session
//! key it stamps onto the header only arrives at logon.

use bytes::BytesMut;
use fixgate_codec::Encoder;
use fixgate_core::{ConnectionId, SessionId, SessionKey, Timestamp};

/// BusinessRejectReason used for throttle rejections.
pub const THROTTLE_BUSINESS_REJECT_REASON: u32 = 99;

/// MsgType of the generated reject.
pub const BUSINESS_MESSAGE_REJECT: &[u8] = b"j";

/// Builds Business Message Reject messages for one session.
#[derive(Debug)]
pub struct ThrottleRejectBuilder {
    encoder: Encoder,
    session_key: SessionKey,
    session_id: SessionId,
    connection_id: ConnectionId,
    window_ms: u64,
    limit: usize,
}

impl ThrottleRejectBuilder {
    /// Creates a builder bound to one session's identity.
    #[must_use]
    pub fn new(
        session_key: SessionKey,
        session_id: SessionId,
        connection_id: ConnectionId,
        window_ms: u64,
        limit: usize,
    ) -> Self {
        let encoder = Encoder::new(session_key.begin_string.clone());
        Self {
            encoder,
            session_key,
            session_id,
            connection_id,
            window_ms,
            limit,
        }
    }

    /// Updates the window/limit quoted in the reject text.
    pub fn configure(&mut self, window_ms: u64, limit: usize) {
        tracing::debug!(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            window_ms,
            limit,
            "throttle reconfigured"
        );
        self.window_ms = window_ms;
        self.limit = limit;
    }

    /// Builds a complete reject message.
    ///
    /// # Arguments
    /// * `ref_msg_type` - MsgType of the message being rejected (tag 372)
    /// * `ref_seq_num` - Sequence number of the message being rejected (tag 45)
    /// * `seq_num` - Sequence number of the reject itself (tag 34)
    /// * `business_reject_ref_id` - Order/request id being rejected (tag 379)
    /// * `sending_time` - SendingTime stamped on the reject (tag 52)
    #[must_use]
    pub fn build(
        &mut self,
        ref_msg_type: &[u8],
        ref_seq_num: u32,
        seq_num: u32,
        business_reject_ref_id: &[u8],
        sending_time: Timestamp,
    ) -> BytesMut {
        let encoder = &mut self.encoder;
        encoder.put_raw(35, BUSINESS_MESSAGE_REJECT);
        encoder.put_str(49, self.session_key.sender_comp_id.as_str());
        encoder.put_str(56, self.session_key.target_comp_id.as_str());
        encoder.put_uint(34, u64::from(seq_num));
        encoder.put_str(52, &sending_time.format_millis());
        encoder.put_uint(45, u64::from(ref_seq_num));
        encoder.put_raw(372, ref_msg_type);
        if !business_reject_ref_id.is_empty() {
            encoder.put_raw(379, business_reject_ref_id);
        }
        encoder.put_uint(380, u64::from(THROTTLE_BUSINESS_REJECT_REASON));
        encoder.put_str(
            58,
            &format!(
                "Throttle limit exceeded ({} in {}ms)",
                self.limit, self.window_ms
            ),
        );

        encoder.finish()
    }
}
