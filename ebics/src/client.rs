//! The client driver: runs key management orders and segmented
//! transactions against one bank, one request at a time.

use chrono::Utc;

use crate::auth_signature;
use crate::codec::{self, ZipEntry};
use crate::config::{Bank, ClientConfig, User};
use crate::crypto::{CryptoProvider, RustCrypto};
use crate::data_encryption::TransactionKey;
use crate::envelope::{BankPubKeyDigests, DataDigest, DataTransfer, Envelope, EnvelopeBuilder, KeyDigest};
use crate::error::{Error, PreconditionError, Result};
use crate::key_management::{self, BankKeys, VersionSupport};
use crate::keyring::{KeySlot, Keyring};
use crate::order::{DateRange, Direction, FileFormat, Order, OrderType, Service, VeuParams};
use crate::response::Response;
use crate::transaction::{split_segments, DownloadTransaction, ReceiptCode, Segment, UploadTransaction};
use crate::transport::Transport;
use crate::version::VersionDescriptor;

/// Result of a completed download.
#[derive(Clone, Debug)]
pub struct Download {
    pub order_type: OrderType,
    pub transaction_id: String,
    pub segments: u32,
    pub receipt: ReceiptCode,
    /// Decrypted, decompressed order data.
    pub data: Vec<u8>,
}

impl Download {
    pub fn is_zip(&self) -> bool {
        codec::is_zip(&self.data)
    }

    /// Unpacks order data delivered as a ZIP container.
    pub fn unzip(&self) -> Result<Vec<ZipEntry>> {
        Ok(codec::unzip(&self.data)?)
    }
}

/// Result of a completed upload.
#[derive(Clone, Debug)]
pub struct Upload {
    pub order_type: OrderType,
    pub transaction_id: String,
    pub order_id: Option<String>,
    pub segments: u32,
}

pub struct EbicsClient<T, C = RustCrypto> {
    bank: Bank,
    user: User,
    keyring: Keyring,
    config: ClientConfig,
    transport: T,
    crypto: C,
}

impl<T: Transport> EbicsClient<T, RustCrypto> {
    pub fn new(bank: Bank, user: User, keyring: Keyring, transport: T) -> Self {
        EbicsClient {
            bank,
            user,
            keyring,
            config: ClientConfig::default(),
            transport,
            crypto: RustCrypto,
        }
    }
}

impl<T: Transport, C: CryptoProvider> EbicsClient<T, C> {
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_crypto<D: CryptoProvider>(self, crypto: D) -> EbicsClient<T, D> {
        EbicsClient {
            bank: self.bank,
            user: self.user,
            keyring: self.keyring,
            config: self.config,
            transport: self.transport,
            crypto,
        }
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn into_keyring(self) -> Keyring {
        self.keyring
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn descriptor(&self) -> &'static VersionDescriptor {
        self.bank.version.descriptor()
    }

    fn builder(&self) -> EnvelopeBuilder<'_> {
        EnvelopeBuilder::new(&self.bank, &self.user, &self.config)
    }

    fn bank_key_digests(&self) -> Result<BankPubKeyDigests, PreconditionError> {
        let authentication = self.keyring.require(KeySlot::BankAuthentication)?;
        let encryption = self.keyring.require(KeySlot::BankEncryption)?;
        Ok(BankPubKeyDigests {
            authentication: KeyDigest {
                version: authentication.version.clone(),
                digest: authentication.digest(&self.crypto),
            },
            encryption: KeyDigest {
                version: encryption.version.clone(),
                digest: encryption.digest(&self.crypto),
            },
        })
    }

    /// Posts one request and classifies the answer.
    fn exchange(&self, envelope: &Envelope, verify_signature: bool) -> Result<Response> {
        let request = envelope.to_bytes();
        log::debug!(
            "POST {} {} ({} bytes)",
            self.bank.url,
            envelope.kind,
            request.len()
        );
        let bytes = self.transport.post(&self.bank.url, &request)?;
        let response = Response::parse(&bytes, self.descriptor())?;
        log::debug!(
            "response {} phase={:?} segment={:?}",
            response.return_code(),
            response.phase,
            response.segment
        );
        if let Err(error) = response.check() {
            log::error!("bank rejected {}: {}", envelope.kind, error);
            return Err(error.with_exchange(request, bytes).into());
        }
        if verify_signature && self.config.verify_bank_signature {
            let bank_key = self.keyring.require(KeySlot::BankAuthentication)?;
            auth_signature::verify(response.root(), &bank_key.public_key, &self.crypto)?;
        }
        Ok(response)
    }

    fn send_signed(&self, mut envelope: Envelope) -> Result<Response> {
        auth_signature::sign(&mut envelope, &self.keyring, &self.crypto)?;
        self.exchange(&envelope, true)
    }

    /// Asks the bank which protocol versions it speaks.
    pub fn hev(&self) -> Result<VersionSupport> {
        let envelope = self.builder().hev()?;
        log::debug!("POST {} {}", self.bank.url, envelope.kind);
        let bytes = self.transport.post(&self.bank.url, &envelope.to_bytes())?;
        let support = key_management::parse_hev_response(&bytes)?;
        log::info!("bank {} supports {:?}", self.bank.host_id, support.versions);
        Ok(support)
    }

    /// Sends the user's signature key.
    pub fn ini(&self) -> Result<Response> {
        let order = Order::new(OrderType::INI);
        let payload = key_management::signature_pub_key_order_data(self.descriptor(), &self.user, &self.keyring)?;
        let envelope = self.builder().unsecured(&order, &payload.to_bytes())?;
        let response = self.exchange(&envelope, false)?;
        log::info!("INI accepted for user {}", self.user.user_id);
        Ok(response)
    }

    /// Sends the user's authentication and encryption keys.
    pub fn hia(&self) -> Result<Response> {
        let order = Order::new(OrderType::HIA);
        let payload = key_management::hia_request_order_data(self.descriptor(), &self.user, &self.keyring)?;
        let envelope = self.builder().unsecured(&order, &payload.to_bytes())?;
        let response = self.exchange(&envelope, false)?;
        log::info!("HIA accepted for user {}", self.user.user_id);
        Ok(response)
    }

    /// Fetches the bank's keys and stores them in the keyring. Takes
    /// `&mut self`, so no other transaction can read the keyring meanwhile.
    pub fn hpb(&mut self) -> Result<BankKeys> {
        let order = Order::new(OrderType::HPB);
        let decryption_key = self.keyring.require_private(KeySlot::UserEncryption)?;
        let mut envelope = self
            .builder()
            .no_pubkey_digests(&order, &self.crypto.generate_nonce(), Utc::now())?;
        auth_signature::sign(&mut envelope, &self.keyring, &self.crypto)?;
        // the bank keys arrive with this response; nothing to verify against yet
        let response = self.exchange(&envelope, false)?;
        let encrypted_key = response
            .transaction_key
            .as_deref()
            .ok_or_else(|| Error::unexpected("HPB response without TransactionKey"))?;
        let order_data = response
            .order_data
            .as_deref()
            .ok_or_else(|| Error::unexpected("HPB response without OrderData"))?;
        let key = TransactionKey::unwrap(&self.crypto, decryption_key, encrypted_key)?;
        let plain = key.open(&self.crypto, &codec::decode_base64(order_data)?)?;
        let keys = key_management::parse_hpb_order_data(&plain, &self.crypto)?;
        self.keyring.set_bank_keys(keys.clone());
        log::info!(
            "stored bank keys {} / {} of {}",
            keys.authentication.version,
            keys.encryption.version,
            self.bank.host_id
        );
        Ok(keys)
    }

    /// Downloads an order and acknowledges it positively.
    pub fn download(&self, order: &Order) -> Result<Download> {
        self.download_with(order, |_| ReceiptCode::Positive)
    }

    /// Downloads an order; `receipt` sees the order data and decides what
    /// to acknowledge.
    pub fn download_with<F>(&self, order: &Order, receipt: F) -> Result<Download>
    where
        F: FnOnce(&[u8]) -> ReceiptCode,
    {
        if order.direction() != Direction::Download {
            return Err(PreconditionError::WrongDirection {
                order_type: order.order_type,
                operation: "download",
            }
            .into());
        }
        order.validate(self.descriptor())?;
        let digests = self.bank_key_digests()?;
        let decryption_key = self.keyring.require_private(KeySlot::UserEncryption)?;
        self.keyring.require_private(KeySlot::UserAuthentication)?;

        let builder = self.builder();
        let init = builder.download_init(order, &self.crypto.generate_nonce(), Utc::now(), digests)?;
        let response = self.send_signed(init)?;
        let transaction_id = response.transaction_id.clone().unwrap_or_default();
        let encrypted_key = response
            .transaction_key
            .as_deref()
            .ok_or_else(|| Error::unexpected("initialisation response without TransactionKey"))?;
        let key = TransactionKey::unwrap(&self.crypto, decryption_key, encrypted_key)?;
        let num_segments = response.num_segments.unwrap_or(1);
        let first = segment_of(response, 1)?;
        let mut transaction = DownloadTransaction::start(transaction_id, key, num_segments, first)?;
        log::debug!(
            "download {} transaction {} has {} segments",
            order.order_type,
            transaction.id(),
            num_segments
        );

        while let Some(mark) = transaction.next_segment() {
            let request = builder.download_transfer(transaction.id(), mark)?;
            let response = self.send_signed(request)?;
            transaction.receive(segment_of(response, mark.number)?)?;
        }

        let data = transaction.key().open(&self.crypto, &transaction.ciphertext()?)?;
        let code = receipt(&data);
        let request = builder.receipt(transaction.id(), code)?;
        self.send_signed(request)?;
        transaction.acknowledge(code)?;
        log::info!(
            "downloaded {} ({} bytes in {} segments), receipt {}",
            order.order_type,
            data.len(),
            num_segments,
            code.as_str()
        );
        Ok(Download {
            order_type: order.order_type,
            transaction_id: transaction.id().to_string(),
            segments: num_segments,
            receipt: code,
            data,
        })
    }

    fn check_upload(&self, order: &Order) -> Result<(), PreconditionError> {
        if order.direction() != Direction::Upload {
            return Err(PreconditionError::WrongDirection {
                order_type: order.order_type,
                operation: "upload",
            });
        }
        order.validate(self.descriptor())
    }

    /// Client generated order id of H003 uploads: a letter and three
    /// alphanumerics.
    fn generate_order_id(&self) -> Option<String> {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        if !self.descriptor().upload_order_id {
            return None;
        }
        let random = self.crypto.random_bytes(4);
        let id = random
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let range = if i == 0 { 26 } else { ALPHABET.len() };
                ALPHABET[*b as usize % range] as char
            })
            .collect();
        Some(id)
    }

    /// Order signature of `digest`, compressed and encrypted with `key`.
    fn signature_data(&self, key: &TransactionKey, digest: &[u8]) -> Result<Vec<u8>> {
        let document =
            key_management::user_signature_data(self.descriptor(), &self.user, &self.keyring, digest, &self.crypto)?;
        Ok(key.seal(&self.crypto, &document.to_bytes())?)
    }

    /// Uploads signed order data.
    pub fn upload(&self, order: &Order, data: &[u8]) -> Result<Upload> {
        if !order.signed {
            return self.upload_unsigned(order, data);
        }
        self.check_upload(order)?;
        if order.order_type.is_signature_only() {
            return Err(PreconditionError::WrongDirection {
                order_type: order.order_type,
                operation: "order data upload",
            }
            .into());
        }
        let digests = self.bank_key_digests()?;
        let bank_encryption = self.keyring.require(KeySlot::BankEncryption)?;
        self.keyring.require_private(KeySlot::UserSignature)?;
        self.keyring.require_private(KeySlot::UserAuthentication)?;

        let key = TransactionKey::generate(&self.crypto);
        let digest = self.crypto.sha256(data);
        let segments = split_segments(
            &key.seal(&self.crypto, data)?,
            self.config.segment_size,
            self.config.max_segments,
        )?;
        let transfer = DataTransfer {
            encryption_info: Some(key.wrap(&self.crypto, bank_encryption)?),
            signature_data: Some(self.signature_data(&key, &digest)?),
            data_digest: self.data_digest(&digest)?,
            ..Default::default()
        };
        let transaction = UploadTransaction::new(segments);
        self.run_upload(order, transaction, digests, transfer)
    }

    fn data_digest(&self, digest: &[u8]) -> Result<Option<DataDigest>> {
        if !self.descriptor().data_digest {
            return Ok(None);
        }
        let entry = self.keyring.require(KeySlot::UserSignature)?;
        Ok(Some(DataDigest {
            signature_version: entry.version.clone(),
            digest: digest.to_vec(),
        }))
    }

    fn run_upload(
        &self,
        order: &Order,
        mut transaction: UploadTransaction,
        digests: BankPubKeyDigests,
        transfer: DataTransfer,
    ) -> Result<Upload> {
        let builder = self.builder();
        let init = builder.upload_init(
            order,
            &self.crypto.generate_nonce(),
            Utc::now(),
            digests,
            transaction.num_segments(),
            self.generate_order_id(),
            transfer,
        )?;
        let response = self.send_signed(init)?;
        transaction.assign_id(response.transaction_id.clone().unwrap_or_default())?;
        let mut order_id = response.order_id.clone();
        self.send_segments(&mut transaction, &mut order_id)?;
        self.finish_upload(order, transaction, order_id)
    }

    fn send_segments(&self, transaction: &mut UploadTransaction, order_id: &mut Option<String>) -> Result<()> {
        let builder = self.builder();
        while let Some((mark, data)) = transaction.next_segment() {
            let id = transaction
                .id()
                .ok_or_else(|| PreconditionError::InvalidState("segment without transaction id".into()))?;
            let request = builder.upload_transfer(id, mark, data.to_vec())?;
            let response = self.send_signed(request)?;
            if response.order_id.is_some() {
                *order_id = response.order_id;
            }
            transaction.acknowledge(mark.number)?;
        }
        Ok(())
    }

    fn finish_upload(&self, order: &Order, mut transaction: UploadTransaction, order_id: Option<String>) -> Result<Upload> {
        transaction.finish(order_id)?;
        let upload = Upload {
            order_type: order.order_type,
            transaction_id: transaction.id().unwrap_or_default().to_string(),
            order_id: transaction.order_id().map(str::to_string),
            segments: transaction.num_segments(),
        };
        log::info!(
            "uploaded {} in {} segments, order id {}",
            upload.order_type,
            upload.segments,
            upload.order_id.as_deref().unwrap_or("-")
        );
        Ok(upload)
    }

    /// Uploads order data without electronic signature (3.0 only). The
    /// first segment travels with the unsigned initialisation request.
    pub fn upload_unsigned(&self, order: &Order, data: &[u8]) -> Result<Upload> {
        let order = order.clone().unsigned();
        self.check_upload(&order)?;
        let bank_encryption = self.keyring.require(KeySlot::BankEncryption)?;
        self.keyring.require_private(KeySlot::UserAuthentication)?;

        let key = TransactionKey::generate(&self.crypto);
        let segments = split_segments(
            &key.seal(&self.crypto, data)?,
            self.config.segment_size,
            self.config.max_segments,
        )?;
        let num_segments = segments.len() as u32;
        let first = segments
            .first()
            .cloned()
            .ok_or_else(|| PreconditionError::InvalidState("nothing to upload".into()))?;
        let builder = self.builder();
        let init = builder.unsigned(
            &order,
            &self.crypto.generate_nonce(),
            Utc::now(),
            num_segments,
            key.wrap(&self.crypto, bank_encryption)?,
            first,
        )?;
        let response = self.exchange(&init, true)?;
        let mut transaction = UploadTransaction::new(segments);
        transaction.assign_id(response.transaction_id.clone().unwrap_or_default())?;
        transaction.acknowledge(1)?;
        let mut order_id = response.order_id.clone();
        self.send_segments(&mut transaction, &mut order_id)?;
        self.finish_upload(&order, transaction, order_id)
    }

    /// Adds (HVE) or cancels with (HVS) the user's signature on an order
    /// waiting in the VEU. `digest` is the order data digest from HVD.
    pub fn sign_veu(&self, order: &Order, digest: &[u8]) -> Result<Upload> {
        self.check_upload(order)?;
        if !order.order_type.is_signature_only() {
            return Err(PreconditionError::WrongDirection {
                order_type: order.order_type,
                operation: "VEU signature",
            }
            .into());
        }
        let digests = self.bank_key_digests()?;
        let bank_encryption = self.keyring.require(KeySlot::BankEncryption)?;
        self.keyring.require_private(KeySlot::UserSignature)?;
        self.keyring.require_private(KeySlot::UserAuthentication)?;

        let key = TransactionKey::generate(&self.crypto);
        let transfer = DataTransfer {
            encryption_info: Some(key.wrap(&self.crypto, bank_encryption)?),
            signature_data: Some(self.signature_data(&key, digest)?),
            data_digest: self.data_digest(digest)?,
            ..Default::default()
        };
        self.run_upload(order, UploadTransaction::new(Vec::new()), digests, transfer)
    }

    fn download_ranged(&self, order_type: OrderType, range: Option<DateRange>) -> Result<Download> {
        let mut order = Order::new(order_type);
        order.range = range;
        self.download(&order)
    }

    pub fn hpd(&self) -> Result<Download> {
        self.download_ranged(OrderType::HPD, None)
    }

    pub fn hkd(&self) -> Result<Download> {
        self.download_ranged(OrderType::HKD, None)
    }

    pub fn htd(&self) -> Result<Download> {
        self.download_ranged(OrderType::HTD, None)
    }

    pub fn haa(&self) -> Result<Download> {
        self.download_ranged(OrderType::HAA, None)
    }

    pub fn hac(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::HAC, range)
    }

    pub fn ptk(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::PTK, range)
    }

    pub fn sta(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::STA, range)
    }

    pub fn vmk(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::VMK, range)
    }

    pub fn c52(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::C52, range)
    }

    pub fn c53(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::C53, range)
    }

    pub fn c54(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::C54, range)
    }

    pub fn z53(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::Z53, range)
    }

    pub fn z54(&self, range: Option<DateRange>) -> Result<Download> {
        self.download_ranged(OrderType::Z54, range)
    }

    pub fn fdl(&self, format: FileFormat, range: Option<DateRange>) -> Result<Download> {
        let mut order = Order::fdl(format);
        order.range = range;
        self.download(&order)
    }

    pub fn btd(&self, service: Service, range: Option<DateRange>) -> Result<Download> {
        let mut order = Order::btd(service);
        order.range = range;
        self.download(&order)
    }

    pub fn hvu(&self) -> Result<Download> {
        self.download_ranged(OrderType::HVU, None)
    }

    pub fn hvz(&self) -> Result<Download> {
        self.download_ranged(OrderType::HVZ, None)
    }

    pub fn hvd(&self, params: VeuParams) -> Result<Download> {
        self.download(&Order::veu(OrderType::HVD, params))
    }

    pub fn hvt(&self, params: VeuParams) -> Result<Download> {
        self.download(&Order::veu(OrderType::HVT, params))
    }

    pub fn ful(&self, format: FileFormat, data: &[u8]) -> Result<Upload> {
        self.upload(&Order::ful(format), data)
    }

    pub fn cct(&self, data: &[u8]) -> Result<Upload> {
        self.upload(&Order::new(OrderType::CCT), data)
    }

    pub fn cdd(&self, data: &[u8]) -> Result<Upload> {
        self.upload(&Order::new(OrderType::CDD), data)
    }

    pub fn xe2(&self, data: &[u8]) -> Result<Upload> {
        self.upload(&Order::new(OrderType::XE2), data)
    }

    pub fn btu(&self, service: Service, data: &[u8]) -> Result<Upload> {
        self.upload(&Order::btu(service), data)
    }

    pub fn hve(&self, params: VeuParams, digest: &[u8]) -> Result<Upload> {
        self.sign_veu(&Order::veu(OrderType::HVE, params), digest)
    }

    pub fn hvs(&self, params: VeuParams, digest: &[u8]) -> Result<Upload> {
        self.sign_veu(&Order::veu(OrderType::HVS, params), digest)
    }
}

fn segment_of(response: Response, expected: u32) -> Result<Segment> {
    let mark = response.segment;
    let ciphertext = response
        .order_data
        .clone()
        .ok_or_else(|| Error::unexpected(format!("segment {} without OrderData", expected)))?;
    let raw = response.document.to_bytes();
    Ok(Segment {
        number: mark.map_or(expected, |m| m.number),
        is_last: mark.map_or(true, |m| m.last),
        ciphertext,
        response: raw,
    })
}
