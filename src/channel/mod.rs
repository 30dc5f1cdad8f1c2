//! channel — транспорт канала миграции: TCP или TLS поверх TCP.
//!
//! Блокирующий целобуферный I/O (read_all/write_all/writev_all/readv_all) и
//! shutdown, которым контроллер выбивает воркера из застрявшего syscall'а.
//!
//! ENV (TLS, клиентская сторона):
//!   RF_TLS_DOMAIN              — переопределить SNI/hostname (по умолчанию host из "host:port")
//!   RF_TLS_CA_FILE             — PEM-файл с CA
//!   RF_TLS_CLIENT_PFX          — путь к PFX/PKCS#12 (mTLS; опц.)
//!   RF_TLS_CLIENT_PFX_PASSWORD — пароль к PFX (mTLS; опц.)
//!
//! ENV (TLS, серверная сторона):
//!   RF_TLS_SERVER_PFX          — PFX/PKCS#12 серверной identity
//!   RF_TLS_SERVER_PFX_PASSWORD — пароль к PFX

use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, TcpStream};

use anyhow::{anyhow, Context, Result};
use native_tls::{
    Certificate as NtCertificate, Identity as NtIdentity, TlsAcceptor, TlsConnector, TlsStream,
};

/// Поток канала: TCP или TLS.
pub enum Channel {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Plain(s) => s.read(buf),
            Channel::Tls(s) => s.read(buf),
        }
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        match self {
            Channel::Plain(s) => s.read_vectored(bufs),
            Channel::Tls(s) => s.read_vectored(bufs),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Channel::Plain(s) => s.write(buf),
            Channel::Tls(s) => s.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self {
            Channel::Plain(s) => s.write_vectored(bufs),
            Channel::Tls(s) => s.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Channel::Plain(s) => s.flush(),
            Channel::Tls(s) => s.flush(),
        }
    }
}

impl Channel {
    fn raw(&self) -> &TcpStream {
        match self {
            Channel::Plain(s) => s,
            Channel::Tls(s) => s.get_ref(),
        }
    }

    /// Клон нижележащего TCP-потока: им другой поток может выбить этот канал
    /// из блокирующего read/write (post семафора застрявший syscall не будит).
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        let clone = self
            .raw()
            .try_clone()
            .map_err(|e| anyhow!("clone channel stream: {}", e))?;
        Ok(ShutdownHandle(clone))
    }

    pub fn set_nodelay(&self) {
        self.raw().set_nodelay(true).ok();
    }

    /// Прочитать buf целиком. Ok(false) — чистый EOF до первого байта;
    /// EOF посреди кадра — ошибка (short read).
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut off = 0usize;
        while off < buf.len() {
            match self.read(&mut buf[off..]) {
                Ok(0) if off == 0 => return Ok(false),
                Ok(0) => {
                    return Err(anyhow!(
                        "short read: got {} of {} bytes before EOF",
                        off,
                        buf.len()
                    ))
                }
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!("read error: {}", e)),
            }
        }
        Ok(true)
    }

    /// Прочитать buf целиком; EOF в любом месте — ошибка.
    pub fn read_all(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.read_exact_or_eof(buf)? {
            true => Ok(()),
            false => Err(anyhow!("unexpected EOF: need {} bytes", buf.len())),
        }
    }

    /// Записать buf целиком; частичные записи дописываются в цикле.
    pub fn write_all_buf(&mut self, buf: &[u8]) -> Result<()> {
        let mut off = 0usize;
        while off < buf.len() {
            match self.write(&buf[off..]) {
                Ok(0) => {
                    return Err(anyhow!(
                        "write stalled: {} of {} bytes sent",
                        off,
                        buf.len()
                    ))
                }
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!("write error: {}", e)),
            }
        }
        Ok(())
    }

    /// Векторная запись всех буферов одним логическим вызовом; остаток после
    /// частичной записи уходит повторными writev по хвосту.
    pub fn writev_all(&mut self, bufs: &[&[u8]]) -> Result<()> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut done = 0usize;
        while done < total {
            let mut skip = done;
            let mut iov: Vec<IoSlice<'_>> = Vec::with_capacity(bufs.len());
            for b in bufs {
                if skip >= b.len() {
                    skip -= b.len();
                    continue;
                }
                iov.push(IoSlice::new(&b[skip..]));
                skip = 0;
            }
            match self.write_vectored(&iov) {
                Ok(0) => {
                    return Err(anyhow!(
                        "vectored write stalled: {} of {} bytes sent",
                        done,
                        total
                    ))
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!("vectored write error: {}", e)),
            }
        }
        Ok(())
    }

    /// Векторное чтение во все буферы целиком; EOF до конца — ошибка.
    pub fn readv_all(&mut self, bufs: &mut [&mut [u8]]) -> Result<()> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut done = 0usize;
        while done < total {
            let mut skip = done;
            let mut iov: Vec<IoSliceMut<'_>> = Vec::with_capacity(bufs.len());
            for b in bufs.iter_mut() {
                let len = b.len();
                if skip >= len {
                    skip -= len;
                    continue;
                }
                iov.push(IoSliceMut::new(&mut b[skip..]));
                skip = 0;
            }
            match self.read_vectored(&mut iov) {
                Ok(0) => {
                    return Err(anyhow!(
                        "unexpected EOF in payload: got {} of {} bytes",
                        done,
                        total
                    ))
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!("vectored read error: {}", e)),
            }
        }
        Ok(())
    }
}

/// Ручка для shutdown канала из другого потока.
pub struct ShutdownHandle(TcpStream);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

// ----------------------------- Подключение каналов -----------------------------

/// Открыть исходящий канал: TCP connect + опциональный TLS-upgrade.
pub fn open_channel(addr: &str, tls: bool) -> Result<Channel> {
    let tcp = TcpStream::connect(addr).with_context(|| format!("connect({})", addr))?;
    tcp.set_nodelay(true).ok();
    if tls {
        upgrade_tls_client(tcp, addr)
    } else {
        Ok(Channel::Plain(tcp))
    }
}

/// Обернуть принятое соединение: опциональный TLS-accept.
pub fn accept_channel(tcp: TcpStream, acceptor: Option<&TlsAcceptor>) -> Result<Channel> {
    tcp.set_nodelay(true).ok();
    match acceptor {
        None => Ok(Channel::Plain(tcp)),
        Some(a) => {
            let tls = a
                .accept(tcp)
                .map_err(|e| anyhow!("tls accept: {}", e))?;
            Ok(Channel::Tls(tls))
        }
    }
}

/// TLS-upgrade клиентской стороны (native-tls).
/// - RF_TLS_CA_FILE — кастомные CA (PEM, несколько блоков поддерживаются).
/// - RF_TLS_CLIENT_PFX/RF_TLS_CLIENT_PFX_PASSWORD — mTLS (PKCS#12).
/// - SNI берём из RF_TLS_DOMAIN или host из addr.
pub fn upgrade_tls_client(tcp: TcpStream, addr: &str) -> Result<Channel> {
    let domain = tls_domain_for_addr(addr)?;
    let mut builder = TlsConnector::builder();

    if let Ok(ca_path) = std::env::var("RF_TLS_CA_FILE") {
        let certs = load_pem_certs(&ca_path)?;
        if certs.is_empty() {
            return Err(anyhow!(
                "no certificates found in CA file {} (expect BEGIN CERTIFICATE blocks)",
                ca_path
            ));
        }
        for cert in certs {
            builder.add_root_certificate(cert);
        }
    }

    if let (Ok(pfx_path), Ok(pfx_pwd)) = (
        std::env::var("RF_TLS_CLIENT_PFX"),
        std::env::var("RF_TLS_CLIENT_PFX_PASSWORD"),
    ) {
        let pfx_der =
            std::fs::read(&pfx_path).map_err(|e| anyhow!("read PFX {}: {}", pfx_path, e))?;
        let id = NtIdentity::from_pkcs12(&pfx_der, &pfx_pwd)
            .map_err(|e| anyhow!("load PFX {}: {}", pfx_path, e))?;
        builder.identity(id);
    }

    let connector = builder.build().map_err(|e| anyhow!("tls build: {}", e))?;
    let tls = connector
        .connect(&domain, tcp)
        .map_err(|e| anyhow!("tls connect (SNI={}): {}", domain, e))?;
    Ok(Channel::Tls(tls))
}

/// TlsAcceptor из RF_TLS_SERVER_PFX, если серверный TLS настроен.
pub fn tls_acceptor_from_env() -> Result<Option<TlsAcceptor>> {
    let Ok(pfx_path) = std::env::var("RF_TLS_SERVER_PFX") else {
        return Ok(None);
    };
    let pfx_pwd = std::env::var("RF_TLS_SERVER_PFX_PASSWORD").unwrap_or_default();
    let pfx_der = std::fs::read(&pfx_path).map_err(|e| anyhow!("read PFX {}: {}", pfx_path, e))?;
    let id = NtIdentity::from_pkcs12(&pfx_der, &pfx_pwd)
        .map_err(|e| anyhow!("load PFX {}: {}", pfx_path, e))?;
    let acceptor = TlsAcceptor::new(id).map_err(|e| anyhow!("tls acceptor: {}", e))?;
    Ok(Some(acceptor))
}

/// Все CERTIFICATE-блоки из PEM-файла. native-tls принимает PEM поблочно.
fn load_pem_certs(path: &str) -> Result<Vec<NtCertificate>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let text =
        std::fs::read_to_string(path).map_err(|e| anyhow!("read CA file {}: {}", path, e))?;
    let mut out = Vec::new();
    let mut rest = text.as_str();
    while let Some(beg) = rest.find(BEGIN) {
        let Some(end_rel) = rest[beg..].find(END) else {
            return Err(anyhow!("PEM block without matching END in {}", path));
        };
        let block = &rest[beg..beg + end_rel + END.len()];
        let cert = NtCertificate::from_pem(block.as_bytes())
            .map_err(|e| anyhow!("parse PEM certificate from {}: {}", path, e))?;
        out.push(cert);
        rest = &rest[beg + end_rel + END.len()..];
    }
    Ok(out)
}

/// Парсер host/SNI из "host:port" и "[ipv6]:port".
fn tls_domain_for_addr(addr: &str) -> Result<String> {
    if let Ok(sni) = std::env::var("RF_TLS_DOMAIN") {
        if !sni.trim().is_empty() {
            return Ok(sni.trim().to_string());
        }
    }
    if addr.starts_with('[') {
        if let Some(end) = addr.find(']') {
            return Ok(addr[1..end].to_string());
        }
        return Err(anyhow!("invalid IPv6 literal in addr: {}", addr));
    }
    if let Some(idx) = addr.rfind(':') {
        return Ok(addr[..idx].to_string());
    }
    Ok(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let t = thread::spawn(move || listener.accept().unwrap().0);
        let client = TcpStream::connect(addr).unwrap();
        let server = t.join().unwrap();
        (Channel::Plain(client), Channel::Plain(server))
    }

    #[test]
    fn writev_readv_roundtrip() {
        let (mut a, mut b) = pair();
        let hdr = vec![1u8; 32];
        let p1 = vec![2u8; 4096];
        let p2 = vec![3u8; 4096];
        a.writev_all(&[&hdr, &p1, &p2]).unwrap();

        let mut rhdr = vec![0u8; 32];
        let mut rp1 = vec![0u8; 4096];
        let mut rp2 = vec![0u8; 4096];
        {
            let mut bufs: Vec<&mut [u8]> = vec![&mut rhdr, &mut rp1, &mut rp2];
            b.readv_all(&mut bufs).unwrap();
        }
        assert_eq!(rhdr, hdr);
        assert_eq!(rp1, p1);
        assert_eq!(rp2, p2);
    }

    #[test]
    fn clean_eof_detected() {
        let (a, mut b) = pair();
        drop(a);
        let mut buf = [0u8; 16];
        assert!(!b.read_exact_or_eof(&mut buf).unwrap());
    }

    #[test]
    fn eof_mid_frame_is_error() {
        let (mut a, mut b) = pair();
        a.write_all_buf(&[1, 2, 3]).unwrap();
        drop(a);
        let mut buf = [0u8; 16];
        assert!(b.read_exact_or_eof(&mut buf).is_err());
    }

    #[test]
    fn shutdown_unblocks_reader() {
        let (a, mut b) = pair();
        let handle = b.shutdown_handle().unwrap();
        let t = thread::spawn(move || {
            let mut buf = [0u8; 16];
            // после shutdown читатель получает EOF либо ошибку — главное, что
            // он разблокируется
            b.read_exact_or_eof(&mut buf)
        });
        thread::sleep(std::time::Duration::from_millis(50));
        handle.shutdown();
        let res = t.join().unwrap();
        match res {
            Ok(false) | Err(_) => {}
            Ok(true) => panic!("reader must unblock with EOF or error"),
        }
        drop(a);
    }

    #[test]
    fn domain_from_addr() {
        assert_eq!(tls_domain_for_addr("leader.example.com:9999").unwrap(), "leader.example.com");
        assert_eq!(tls_domain_for_addr("[::1]:9999").unwrap(), "::1");
        assert_eq!(tls_domain_for_addr("bare-host").unwrap(), "bare-host");
    }
}
