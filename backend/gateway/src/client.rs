//! Protocol client: submit images on one half of the connection, read
//! results on the other.

use ocrforge_core::{read_frame, write_frame, ClientFrame, FrameError, JobRequest, ServerFrame};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Open a session over TCP.
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    max_message_size: usize,
) -> Result<(JobSender<WriteHalf<TcpStream>>, ResultStream<ReadHalf<TcpStream>>), FrameError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(split(stream, max_message_size))
}

/// Split any byte stream into a sender and a result stream.
pub fn split<S>(stream: S, max_message_size: usize) -> (JobSender<WriteHalf<S>>, ResultStream<ReadHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (
        JobSender {
            writer,
            limit: max_message_size,
        },
        ResultStream {
            reader,
            limit: max_message_size,
            closed: false,
        },
    )
}

pub struct JobSender<W> {
    writer: W,
    limit: usize,
}

impl<W: AsyncWrite + Unpin> JobSender<W> {
    pub async fn send(&mut self, request: JobRequest) -> Result<(), FrameError> {
        write_frame(&mut self.writer, &ClientFrame::Submit(request), self.limit).await
    }

    /// Declare end-of-input. The server drains and then closes.
    pub async fn finish(mut self) -> Result<(), FrameError> {
        write_frame(&mut self.writer, &ClientFrame::Finish, self.limit).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

pub struct ResultStream<R> {
    reader: R,
    limit: usize,
    closed: bool,
}

impl<R: AsyncRead + Unpin> ResultStream<R> {
    /// Next frame from the server, or `None` once the close frame has been
    /// returned (or the server hung up).
    pub async fn next(&mut self) -> Result<Option<ServerFrame>, FrameError> {
        if self.closed {
            return Ok(None);
        }
        let frame = read_frame(&mut self.reader, self.limit).await?;
        if matches!(frame, None | Some(ServerFrame::Close(_))) {
            self.closed = true;
        }
        Ok(frame)
    }
}
