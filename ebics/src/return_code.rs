//! Bank return codes.
//!
//! A closed table maps each six digit EBICS return code to a kind, its
//! symbolic name and the canned meaning text. [`BankError::from_code`]
//! classifies any code, falling back to [`ReturnCodeKind::Unknown`] for
//! codes outside the table.

use std::fmt;

use thiserror::Error;

pub const OK: &str = "000000";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCodeFamily {
    Success,
    /// 011000/011001, download post-processing acknowledgements.
    Informational,
    /// Other 011xxx codes: the bank terminated the transaction.
    TransactionTerminated,
    /// 031xxx, parameters ignored by the bank.
    Warning,
    /// 061xxx, authentication or request format errors outside a transaction.
    Transport,
    /// 090xxx/091xxx, business and security errors.
    Business,
    Unknown,
}

impl ReturnCodeFamily {
    pub fn of(code: &str) -> Self {
        match code {
            OK => ReturnCodeFamily::Success,
            "011000" | "011001" => ReturnCodeFamily::Informational,
            c if c.starts_with("011") => ReturnCodeFamily::TransactionTerminated,
            c if c.starts_with("031") => ReturnCodeFamily::Warning,
            c if c.starts_with("061") => ReturnCodeFamily::Transport,
            c if c.starts_with("090") || c.starts_with("091") => ReturnCodeFamily::Business,
            _ => ReturnCodeFamily::Unknown,
        }
    }

    /// Whether a transaction may continue after a code of this family.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ReturnCodeFamily::Success | ReturnCodeFamily::Informational | ReturnCodeFamily::Warning
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCodeKind {
    Ok,
    DownloadPostprocessDone,
    DownloadPostprocessSkipped,
    TxSegmentNumberUnderrun,
    OrderParamsIgnored,
    AuthenticationFailed,
    InvalidRequest,
    InternalError,
    TxRecoverySync,
    AuthorisationOrderTypeFailed,
    InvalidOrderDataFormat,
    NoDownloadDataAvailable,
    UnsupportedRequestForOrderInstance,
    InvalidUserOrUserState,
    UserUnknown,
    InvalidUserState,
    InvalidOrderType,
    UnsupportedOrderType,
    DistributedSignatureAuthorisationFailed,
    BankPubkeyUpdateRequired,
    SegmentSizeExceeded,
    InvalidXml,
    InvalidHostId,
    TxUnknownTxid,
    TxAbort,
    TxMessageReplay,
    TxSegmentNumberExceeded,
    RecoveryNotSupported,
    InvalidSignatureFileFormat,
    InvalidOrderParams,
    InvalidRequestContent,
    OrderIdUnknown,
    OrderIdAlreadyExists,
    ProcessingError,
    MaxOrderDataSizeExceeded,
    MaxSegmentsExceeded,
    MaxTransactionsExceeded,
    PartnerIdMismatch,
    IncompatibleOrderAttribute,
    KeymgmtUnsupportedVersionSignature,
    KeymgmtUnsupportedVersionAuthentication,
    KeymgmtUnsupportedVersionEncryption,
    KeymgmtKeylengthErrorSignature,
    KeymgmtKeylengthErrorAuthentication,
    KeymgmtKeylengthErrorEncryption,
    KeymgmtNoX509Support,
    X509CertificateExpired,
    X509CertificateNotValidYet,
    X509WrongKeyUsage,
    X509WrongAlgorithm,
    X509InvalidThumbprint,
    X509CtlInvalid,
    X509UnknownCertificateAuthority,
    X509InvalidPolicy,
    X509InvalidBasicConstraints,
    OnlyX509Support,
    KeymgmtDuplicateKey,
    CertificatesValidationError,
    SignatureVerificationFailed,
    AccountAuthorisationFailed,
    AmountCheckFailed,
    SignerUnknown,
    InvalidSignerState,
    DuplicateSignature,
    /// Any code outside the table.
    Unknown,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ReturnCodeEntry {
    pub code: &'static str,
    pub kind: ReturnCodeKind,
    pub symbol: &'static str,
    pub meaning: &'static str,
}

const fn entry(
    code: &'static str,
    kind: ReturnCodeKind,
    symbol: &'static str,
    meaning: &'static str,
) -> ReturnCodeEntry {
    ReturnCodeEntry {
        code,
        kind,
        symbol,
        meaning,
    }
}

use ReturnCodeKind as K;

pub static RETURN_CODES: &[ReturnCodeEntry] = &[
    entry(OK, K::Ok, "EBICS_OK", "No technical errors occurred during processing of the EBICS request."),
    entry(
        "011000",
        K::DownloadPostprocessDone,
        "EBICS_DOWNLOAD_POSTPROCESS_DONE",
        "The positive acknowledgment of the EBICS response that is sent to the client from the server.",
    ),
    entry(
        "011001",
        K::DownloadPostprocessSkipped,
        "EBICS_DOWNLOAD_POSTPROCESS_SKIPPED",
        "The negative acknowledgment of the EBICS response that is sent to the client from the server.",
    ),
    entry(
        "011101",
        K::TxSegmentNumberUnderrun,
        "EBICS_TX_SEGMENT_NUMBER_UNDERRUN",
        "The server terminates the transaction because the client, in an upload transaction, has specified a very high (when compared to the number specified in the initialisation phase) number of segments that are to be transmitted to the server.",
    ),
    entry(
        "031001",
        K::OrderParamsIgnored,
        "EBICS_ORDER_PARAMS_IGNORED",
        "The supplied order parameters that are not supported by the bank are ignored.",
    ),
    entry(
        "061001",
        K::AuthenticationFailed,
        "EBICS_AUTHENTICATION_FAILED",
        "The bank is unable to verify the identification and authentication signature of an EBICS request.",
    ),
    entry(
        "061002",
        K::InvalidRequest,
        "EBICS_INVALID_REQUEST",
        "The received EBICS XML message does not conform to the EBICS specifications.",
    ),
    entry(
        "061099",
        K::InternalError,
        "EBICS_INTERNAL_ERROR",
        "An internal error occurred when processing an EBICS request.",
    ),
    entry(
        "061101",
        K::TxRecoverySync,
        "EBICS_TX_RECOVERY_SYNC",
        "If the bank supports transaction recovery, the bank verifies whether an upload transaction can be recovered. The server synchronizes with the client to recover the transaction.",
    ),
    entry(
        "090003",
        K::AuthorisationOrderTypeFailed,
        "EBICS_AUTHORISATION_ORDER_TYPE_FAILED",
        "The subscriber is not entitled to submit orders of the selected order type. If the authorization is missing when the bank verifies whether the subscriber has a bank-technical authorization of signature for the order, the transaction is cancelled.",
    ),
    entry(
        "090004",
        K::InvalidOrderDataFormat,
        "EBICS_INVALID_ORDER_DATA_FORMAT",
        "The order data does not correspond with the designated format.",
    ),
    entry(
        "090005",
        K::NoDownloadDataAvailable,
        "EBICS_NO_DOWNLOAD_DATA_AVAILABLE",
        "If the requested download data is not available, the EBICS transaction is terminated.",
    ),
    entry(
        "090006",
        K::UnsupportedRequestForOrderInstance,
        "EBICS_UNSUPPORTED_REQUEST_FOR_ORDER_INSTANCE",
        "In the case of some business transactions, it is not possible to retrieve detailed information of the order data.",
    ),
    entry(
        "091002",
        K::InvalidUserOrUserState,
        "EBICS_INVALID_USER_OR_USER_STATE",
        "Error that results from an invalid combination of user ID or an invalid subscriber state.",
    ),
    entry(
        "091003",
        K::UserUnknown,
        "EBICS_USER_UNKNOWN",
        "The identification and authentication signature of the technical user is successfully verified but the non-technical subscriber is not known to the bank.",
    ),
    entry(
        "091004",
        K::InvalidUserState,
        "EBICS_INVALID_USER_STATE",
        "The identification and authentication signature of the technical user is successfully verified and the non-technical subscriber is known to the bank, but the user is not in a 'Ready' state.",
    ),
    entry(
        "091005",
        K::InvalidOrderType,
        "EBICS_INVALID_ORDER_TYPE",
        "Upon verification, the bank finds that the order type specified in invalid.",
    ),
    entry(
        "091006",
        K::UnsupportedOrderType,
        "EBICS_UNSUPPORTED_ORDER_TYPE",
        "Upon verification, the bank finds that the order type specified in valid but not supported by the bank.",
    ),
    entry(
        "091007",
        K::DistributedSignatureAuthorisationFailed,
        "EBICS_DISTRIBUTED_SIGNATURE_AUTHORISATION_FAILED",
        "Subscriber possesses no authorization of signature for the referenced order in the VEU administration.",
    ),
    entry(
        "091008",
        K::BankPubkeyUpdateRequired,
        "EBICS_BANK_PUBKEY_UPDATE_REQUIRED",
        "The bank verifies the hash value sent by the user. If the hash value does not match the current public keys, the bank terminates the transaction initialization.",
    ),
    entry(
        "091009",
        K::SegmentSizeExceeded,
        "EBICS_SEGMENT_SIZE_EXCEEDED",
        "If the size of the transmitted order data segment exceeds 1 MB, the transaction is terminated.",
    ),
    entry(
        "091010",
        K::InvalidXml,
        "EBICS_INVALID_XML",
        "The XML schema does not conform to the EBICS specifications.",
    ),
    entry(
        "091011",
        K::InvalidHostId,
        "EBICS_INVALID_HOST_ID",
        "The transmitted host ID is not known to the bank.",
    ),
    entry(
        "091101",
        K::TxUnknownTxid,
        "EBICS_TX_UNKNOWN_TXID",
        "The supplied transaction ID is invalid.",
    ),
    entry(
        "091102",
        K::TxAbort,
        "EBICS_TX_ABORT",
        "If the bank supports transaction recovery, the bank verifies whether an upload transaction can be recovered. If the transaction cannot be recovered, the bank terminates the transaction.",
    ),
    entry(
        "091103",
        K::TxMessageReplay,
        "EBICS_TX_MESSAGE_REPLAY",
        "To avoid replay, the bank compares the received Nonce with the list of nonce values that are received previously and stored locally. If the nonce received is greater than the tolerance period specified by the bank, the response EBICS_TX_MESSAGE_REPLAY is returned.",
    ),
    entry(
        "091104",
        K::TxSegmentNumberExceeded,
        "EBICS_TX_SEGMENT_NUMBER_EXCEEDED",
        "The serial number of the transmitted order data segment must be less than or equal to the total number of data segments that are to be transmitted. The transaction is terminated if the number of transmitted order data segments exceeds the total number of data segments.",
    ),
    entry(
        "091105",
        K::RecoveryNotSupported,
        "EBICS_RECOVERY_NOT_SUPPORTED",
        "If the bank does not support transaction recovery, the upload transaction is terminated.",
    ),
    entry(
        "091111",
        K::InvalidSignatureFileFormat,
        "EBICS_INVALID_SIGNATURE_FILE_FORMAT",
        "The submitted ES files do not comply with the defined format. The ES file cannot be parsed syntactically (no business-related verification!).",
    ),
    entry(
        "091112",
        K::InvalidOrderParams,
        "EBICS_INVALID_ORDER_PARAMS",
        "In an HVT request, the subscriber specifies the order for which they want to retrieve the VEU transaction details. The HVT request also specifies an offset position in the original order file that marks the starting point of the transaction details to be transmitted. The order details after the specified offset position are returned. If the value specified for offset is higher than the total number of order details, the error EBICS_INVALID_ORDER_PARAMS is returned.",
    ),
    entry(
        "091113",
        K::InvalidRequestContent,
        "EBICS_INVALID_REQUEST_CONTENT",
        "The EBICS request does not conform to the XML schema definition specified for individual requests.",
    ),
    entry(
        "091114",
        K::OrderIdUnknown,
        "EBICS_ORDERID_UNKNOWN",
        "Upon verification, the bank finds that the order is not located in the VEU processing system.",
    ),
    entry(
        "091115",
        K::OrderIdAlreadyExists,
        "EBICS_ORDERID_ALREADY_EXISTS",
        "The submitted order number already exists.",
    ),
    entry(
        "091116",
        K::ProcessingError,
        "EBICS_PROCESSING_ERROR",
        "When processing an EBICS request, other business-related errors occurred.",
    ),
    entry(
        "091117",
        K::MaxOrderDataSizeExceeded,
        "EBICS_MAX_ORDER_DATA_SIZE_EXCEEDED",
        "The bank does not support the requested order size.",
    ),
    entry(
        "091118",
        K::MaxSegmentsExceeded,
        "EBICS_MAX_SEGMENTS_EXCEEDED",
        "The submitted number of segments for upload is very high.",
    ),
    entry(
        "091119",
        K::MaxTransactionsExceeded,
        "EBICS_MAX_TRANSACTIONS_EXCEEDED",
        "The maximum number of parallel transactions per customer is exceeded.",
    ),
    entry(
        "091120",
        K::PartnerIdMismatch,
        "EBICS_PARTNER_ID_MISMATCH",
        "The partner ID (=customer ID) of the ES file is not identical to the partner ID (=customer ID) of the submitter.",
    ),
    entry(
        "091121",
        K::IncompatibleOrderAttribute,
        "EBICS_INCOMPATIBLE_ORDER_ATTRIBUTE",
        "The specified order attribute is not compatible with the order in the bank system. If the bank has a file with the attribute DZHNN or other electronic signature files (for example, with the attribute UZHNN) for the same order, then the use of the order attributes DZHNN is not allowed. Also, if the bank already has the same order and the order was transmitted with the order attributes DZHNN, then again the use of the order attributes DZHNN is not allowed.",
    ),
    entry(
        "091201",
        K::KeymgmtUnsupportedVersionSignature,
        "EBICS_KEYMGMT_UNSUPPORTED_VERSION_SIGNATURE",
        "When processing an INI request, the order data contains an inadmissible version of the bank-technical signature process.",
    ),
    entry(
        "091202",
        K::KeymgmtUnsupportedVersionAuthentication,
        "EBICS_KEYMGMT_UNSUPPORTED_VERSION_AUTHENTICATION",
        "When processing an HIA request, the order data contains an inadmissible version of the identification and authentication signature process.",
    ),
    entry(
        "091203",
        K::KeymgmtUnsupportedVersionEncryption,
        "EBICS_KEYMGMT_UNSUPPORTED_VERSION_ENCRYPTION",
        "When processing an HIA request, the order data contains an inadmissible version of the encryption process.",
    ),
    entry(
        "091204",
        K::KeymgmtKeylengthErrorSignature,
        "EBICS_KEYMGMT_KEYLENGTH_ERROR_SIGNATURE",
        "When processing an INI request, the order data contains an bank-technical key of inadmissible length.",
    ),
    entry(
        "091205",
        K::KeymgmtKeylengthErrorAuthentication,
        "EBICS_KEYMGMT_KEYLENGTH_ERROR_AUTHENTICATION",
        "When processing an HIA request, the order data contains an identification and authentication key of inadmissible length.",
    ),
    entry(
        "091206",
        K::KeymgmtKeylengthErrorEncryption,
        "EBICS_KEYMGMT_KEYLENGTH_ERROR_ENCRYPTION",
        "When processing an HIA request, the order data contains an encryption key of inadmissible length.",
    ),
    entry(
        "091207",
        K::KeymgmtNoX509Support,
        "EBICS_KEYMGMT_NO_X509_SUPPORT",
        "A public key of type X509 is sent to the bank but the bank supports only public key value type.",
    ),
    entry(
        "091208",
        K::X509CertificateExpired,
        "EBICS_X509_CERTIFICATE_EXPIRED",
        "The certificate is not valid because it has expired.",
    ),
    entry(
        "091209",
        K::X509CertificateNotValidYet,
        "EBICS_X509_CERTIFICATE_NOT_VALID_YET",
        "The certificate is not valid because it is not yet in effect.",
    ),
    entry(
        "091210",
        K::X509WrongKeyUsage,
        "EBICS_X509_WRONG_KEY_USAGE",
        "When verifying the certificate key usage, the bank detects that the certificate is not issued for current use.",
    ),
    entry(
        "091211",
        K::X509WrongAlgorithm,
        "EBICS_X509_WRONG_ALGORITHM",
        "When verifying the certificate algorithm, the bank detects that the certificate is not issued for current use.",
    ),
    entry(
        "091212",
        K::X509InvalidThumbprint,
        "EBICS_X509_INVALID_THUMBPRINT",
        "Reserved for future use.",
    ),
    entry(
        "091213",
        K::X509CtlInvalid,
        "EBICS_X509_CTL_INVALID",
        "When verifying the certificate, the bank detects that the certificate trust list (CTL) is not valid.",
    ),
    entry(
        "091214",
        K::X509UnknownCertificateAuthority,
        "EBICS_X509_UNKNOWN_CERTIFICATE_AUTHORITY",
        "The chain cannot be verified due to an unknown certificate authority (CA).",
    ),
    entry(
        "091215",
        K::X509InvalidPolicy,
        "EBICS_X509_INVALID_POLICY",
        "Reserved for future use.",
    ),
    entry(
        "091216",
        K::X509InvalidBasicConstraints,
        "EBICS_X509_INVALID_BASIC_CONSTRAINTS",
        "Reserved for future use.",
    ),
    entry(
        "091217",
        K::OnlyX509Support,
        "EBICS_ONLY_X509_SUPPORT",
        "With respect to certificates, the bank accepts only signature certificates (X509).",
    ),
    entry(
        "091218",
        K::KeymgmtDuplicateKey,
        "EBICS_KEYMGMT_DUPLICATE_KEY",
        "The key sent for authentication or encryption is the same as the signature key.",
    ),
    entry(
        "091219",
        K::CertificatesValidationError,
        "EBICS_CERTIFICATES_VALIDATION_ERROR",
        "The server is unable to match the certificate (ES key) with the previously declared information automatically.",
    ),
    entry(
        "091301",
        K::SignatureVerificationFailed,
        "EBICS_SIGNATURE_VERIFICATION_FAILED",
        "Verification of the ES has failed. In the case of asynchronously-implemented orders, the error can occur during preliminary verification.",
    ),
    entry(
        "091302",
        K::AccountAuthorisationFailed,
        "EBICS_ACCOUNT_AUTHORISATION_FAILED",
        "Preliminary verification of the account authorization has failed.",
    ),
    entry(
        "091303",
        K::AmountCheckFailed,
        "EBICS_AMOUNT_CHECK_FAILED",
        "Preliminary verification of the account amount limit has failed.",
    ),
    entry(
        "091304",
        K::SignerUnknown,
        "EBICS_SIGNER_UNKNOWN",
        "The originator of the ES is not a valid subscriber.",
    ),
    entry(
        "091305",
        K::InvalidSignerState,
        "EBICS_INVALID_SIGNER_STATE",
        "The state of the signatory is not admissible.",
    ),
    entry(
        "091306",
        K::DuplicateSignature,
        "EBICS_DUPLICATE_SIGNATURE",
        "The signatory has already signed the order.",
    ),
];

pub fn lookup(code: &str) -> Option<&'static ReturnCodeEntry> {
    RETURN_CODES.iter().find(|entry| entry.code == code)
}

/// A classified bank return code.
#[derive(Clone, Debug, Error)]
pub struct BankError {
    pub kind: ReturnCodeKind,
    pub code: String,
    pub symbol: &'static str,
    pub meaning: &'static str,
    /// Report text sent by the bank, if any.
    pub message: Option<String>,
    pub request: Option<Vec<u8>>,
    pub response: Option<Vec<u8>>,
}

impl BankError {
    /// Classifies `code`. Codes outside the table keep their raw value and
    /// get [`ReturnCodeKind::Unknown`].
    pub fn from_code(code: &str, message: Option<&str>) -> Self {
        let (kind, symbol, meaning) = match lookup(code) {
            Some(entry) => (entry.kind, entry.symbol, entry.meaning),
            None => (ReturnCodeKind::Unknown, "EBICS_UNKNOWN", "Unknown EBICS return code."),
        };
        BankError {
            kind,
            code: code.to_string(),
            symbol,
            meaning,
            message: message.map(str::to_string),
            request: None,
            response: None,
        }
    }

    /// Attaches the exchange that produced this code, for diagnostics.
    pub fn with_exchange(mut self, request: Vec<u8>, response: Vec<u8>) -> Self {
        self.request = Some(request);
        self.response = Some(response);
        self
    }

    pub fn family(&self) -> ReturnCodeFamily {
        ReturnCodeFamily::of(&self.code)
    }
}

impl fmt::Display for BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.symbol, self.meaning)?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}
